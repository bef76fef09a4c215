use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A student on the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: u32,
    pub name: String,
    /// Position on the roster, unique.
    pub number: u32,
    pub created_at: DateTime<Utc>,
}

/// One student's state for one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub submitted: bool,
    pub score: Option<u8>,
}

/// An assignment tracked per student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: u32,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Keyed by student id. Students without an entry have not submitted.
    #[serde(default)]
    pub submissions: BTreeMap<u32, Submission>,
}

impl Task {
    pub fn submission(&self, student_id: u32) -> Submission {
        self.submissions
            .get(&student_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn submitted_count(&self) -> usize {
        self.submissions.values().filter(|s| s.submitted).count()
    }
}

/// Request to add a student.
#[derive(Debug, Deserialize)]
pub struct CreateStudentRequest {
    pub name: String,
    pub number: Option<u32>,
}

/// Request to rename a student.
#[derive(Debug, Deserialize)]
pub struct UpdateStudentRequest {
    pub name: String,
}

/// Request to add a task.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
}

/// Request to set or clear a score on the current task.
#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub score: Option<u8>,
}

/// Response for the students list.
#[derive(Debug, Serialize)]
pub struct GetStudentsResponse {
    pub students: Vec<Student>,
}

/// Response for the tasks list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTasksResponse {
    pub current_task_id: Option<u32>,
    pub tasks: Vec<Task>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_serializes_submissions_by_student() {
        let mut task = Task {
            id: 1,
            name: "Essay".to_string(),
            created_at: Utc::now(),
            submissions: BTreeMap::new(),
        };
        task.submissions.insert(
            7,
            Submission {
                submitted: true,
                score: Some(90),
            },
        );

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["submissions"]["7"]["score"], 90);

        let back: Task = serde_json::from_value(value).unwrap();
        assert_eq!(back.submission(7).score, Some(90));
        assert_eq!(back.submission(8), Submission::default());
        assert_eq!(back.submitted_count(), 1);
    }
}
