//! Read model of the roster, rebuilt whenever the composition root asks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rollcall_core::{Module, ModuleError, StateStore};

use crate::managers::{read, write, StudentManager, TaskManager};

/// State key selecting the row order.
pub const SORT_BY_KEY: &str = "sortBy";
/// State key toggling score display.
pub const SHOW_SCORES_KEY: &str = "showScores";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub level: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterRow {
    pub id: u32,
    pub number: u32,
    pub name: String,
    pub submitted: bool,
    pub score: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub id: u32,
    pub name: String,
    pub submitted: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterSnapshot {
    pub task: Option<TaskSummary>,
    pub rows: Vec<RosterRow>,
    pub sort_by: String,
    pub show_scores: bool,
    pub render_count: u64,
    pub notice: Option<Notice>,
}

/// The roster as a user would see it.
///
/// Every collaborator is optional: a missing one renders as empty rather
/// than failing, so the view survives a partially started runtime.
pub struct RosterView {
    students: Option<Arc<StudentManager>>,
    tasks: Option<Arc<TaskManager>>,
    state: Option<Arc<StateStore>>,
    snapshot: RwLock<RosterSnapshot>,
    notice: RwLock<Option<Notice>>,
    renders: AtomicU64,
}

impl RosterView {
    pub fn new(
        students: Option<Arc<StudentManager>>,
        tasks: Option<Arc<TaskManager>>,
        state: Option<Arc<StateStore>>,
    ) -> Self {
        Self {
            students,
            tasks,
            state,
            snapshot: RwLock::new(RosterSnapshot::default()),
            notice: RwLock::new(None),
            renders: AtomicU64::new(0),
        }
    }

    /// Rebuild the snapshot from the collaborators.
    pub fn render(&self) -> RosterSnapshot {
        let sort_by = self
            .state
            .as_ref()
            .and_then(|s| s.get(SORT_BY_KEY))
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "number".to_string());
        let show_scores = self
            .state
            .as_ref()
            .and_then(|s| s.get(SHOW_SCORES_KEY))
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let students = self
            .students
            .as_ref()
            .map(|s| s.list())
            .unwrap_or_default();
        let current = self.tasks.as_ref().and_then(|t| t.current());

        let mut rows: Vec<RosterRow> = students
            .iter()
            .map(|student| {
                let submission = current
                    .as_ref()
                    .map(|task| task.submission(student.id))
                    .unwrap_or_default();
                RosterRow {
                    id: student.id,
                    number: student.number,
                    name: student.name.clone(),
                    submitted: submission.submitted,
                    score: if show_scores { submission.score } else { None },
                }
            })
            .collect();
        sort_rows(&mut rows, &sort_by);

        let task = current.map(|task| TaskSummary {
            id: task.id,
            submitted: rows.iter().filter(|r| r.submitted).count(),
            total: rows.len(),
            name: task.name,
        });

        let snapshot = RosterSnapshot {
            task,
            rows,
            sort_by,
            show_scores,
            render_count: self.renders.fetch_add(1, Ordering::SeqCst) + 1,
            notice: read(&self.notice).clone(),
        };
        *write(&self.snapshot) = snapshot.clone();
        snapshot
    }

    /// Last rendered snapshot.
    pub fn snapshot(&self) -> RosterSnapshot {
        read(&self.snapshot).clone()
    }

    pub fn show_notice(&self, level: &str, message: &str) {
        tracing::debug!(level, message, "Notice");
        *write(&self.notice) = Some(Notice {
            level: level.to_string(),
            message: message.to_string(),
            at: Utc::now(),
        });
    }

    pub fn notice(&self) -> Option<Notice> {
        read(&self.notice).clone()
    }

    pub fn render_count(&self) -> u64 {
        self.renders.load(Ordering::SeqCst)
    }
}

fn sort_rows(rows: &mut [RosterRow], sort_by: &str) {
    match sort_by {
        "name" => rows.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase())),
        // Outstanding work first.
        "status" => rows.sort_by_key(|r| (r.submitted, r.number)),
        _ => rows.sort_by_key(|r| r.number),
    }
}

impl Module for RosterView {
    fn init(&self) -> Result<(), ModuleError> {
        if self.students.is_none() || self.tasks.is_none() {
            tracing::warn!("Roster view started without all collaborators");
        }
        self.render();
        Ok(())
    }
}
