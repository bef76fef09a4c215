use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde_json::{json, Value};

use rollcall_core::{
    load_as, save_as, EventBus, Module, ModuleError, PersistencePort, StateStore, StoreError,
};

use super::{normalize_name, notify_unsaved, read, write};
use crate::error::DomainError;
use crate::events::{TASK_ADDED, TASK_REMOVED, TASK_UPDATED};
use crate::models::{Submission, Task};

/// Port key the task list is stored under.
pub const TASKS_KEY: &str = "tasks";
/// Port key of the next task id. Ids are never reused.
pub const TASKS_NEXT_ID_KEY: &str = "tasks.nextId";
/// State key holding the selected task id, or null.
pub const CURRENT_TASK_KEY: &str = "currentTaskId";
/// State key stamped whenever a submission changes.
pub const LAST_MODIFIED_KEY: &str = "lastModified";

pub const MAX_SCORE: u8 = 100;

pub struct TaskManager {
    port: Arc<dyn PersistencePort>,
    bus: Arc<EventBus>,
    state: Arc<StateStore>,
    tasks: RwLock<Vec<Task>>,
    next_id: AtomicU32,
}

impl TaskManager {
    pub fn new(port: Arc<dyn PersistencePort>, bus: Arc<EventBus>, state: Arc<StateStore>) -> Self {
        Self {
            port,
            bus,
            state,
            tasks: RwLock::new(Vec::new()),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn list(&self) -> Vec<Task> {
        read(&self.tasks).clone()
    }

    pub fn get(&self, id: u32) -> Option<Task> {
        read(&self.tasks).iter().find(|t| t.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        read(&self.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id stored under `currentTaskId`, if it names an existing task.
    pub fn current_id(&self) -> Option<u32> {
        let id = self
            .state
            .get(CURRENT_TASK_KEY)
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())?;
        read(&self.tasks).iter().any(|t| t.id == id).then_some(id)
    }

    pub fn current(&self) -> Option<Task> {
        self.current_id().and_then(|id| self.get(id))
    }

    /// Add a task. The first task added becomes the current one.
    pub fn add(&self, name: &str) -> Result<Task, DomainError> {
        let name = normalize_name(name)?;

        let (task, saved) = {
            let mut tasks = write(&self.tasks);
            let task = Task {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                name,
                created_at: Utc::now(),
                submissions: BTreeMap::new(),
            };
            tasks.push(task.clone());
            (task, self.save(&tasks))
        };

        self.report_unsaved(saved);
        tracing::info!(id = task.id, "Task added");
        self.emit(TASK_ADDED, json!(task));

        if self.current_id().is_none() {
            self.select(Some(task.id))?;
        }
        Ok(task)
    }

    pub fn rename(&self, id: u32, name: &str) -> Result<Task, DomainError> {
        let name = normalize_name(name)?;
        let task = self.update(id, |task| task.name = name)?;
        self.emit(TASK_UPDATED, json!(task));
        Ok(task)
    }

    /// Remove a task. When it was current, the first remaining task takes over.
    pub fn remove(&self, id: u32) -> Result<Task, DomainError> {
        let was_current = self.current_id() == Some(id);

        let (task, next, saved) = {
            let mut tasks = write(&self.tasks);
            let pos = tasks
                .iter()
                .position(|t| t.id == id)
                .ok_or(DomainError::TaskNotFound(id))?;
            let task = tasks.remove(pos);
            (task, tasks.first().map(|t| t.id), self.save(&tasks))
        };

        self.report_unsaved(saved);
        tracing::info!(id, "Task removed");
        self.emit(TASK_REMOVED, json!(task));

        if was_current {
            self.select(next)?;
        }
        Ok(task)
    }

    /// Make `id` the current task.
    pub fn switch(&self, id: u32) -> Result<Task, DomainError> {
        let task = self.get(id).ok_or(DomainError::TaskNotFound(id))?;
        self.select(Some(id))?;
        tracing::debug!(id, "Switched task");
        Ok(task)
    }

    /// Flip a student's submitted flag on the current task.
    pub fn toggle_submission(&self, student_id: u32) -> Result<Submission, DomainError> {
        let current = self.current_id().ok_or(DomainError::NoCurrentTask)?;
        let mut result = Submission::default();
        let task = self.update(current, |task| {
            let entry = task.submissions.entry(student_id).or_default();
            entry.submitted = !entry.submitted;
            result = *entry;
        })?;
        self.touch()?;
        self.emit(TASK_UPDATED, json!(task));
        Ok(result)
    }

    /// Set or clear a score on the current task. A score marks the work submitted.
    pub fn set_score(&self, student_id: u32, score: Option<u8>) -> Result<Submission, DomainError> {
        if let Some(score) = score {
            if score > MAX_SCORE {
                return Err(DomainError::InvalidScore(score));
            }
        }
        let current = self.current_id().ok_or(DomainError::NoCurrentTask)?;
        let mut result = Submission::default();
        let task = self.update(current, |task| {
            let entry = task.submissions.entry(student_id).or_default();
            entry.score = score;
            if score.is_some() {
                entry.submitted = true;
            }
            result = *entry;
        })?;
        self.touch()?;
        self.emit(TASK_UPDATED, json!(task));
        Ok(result)
    }

    /// Submission of one student on the current task.
    pub fn submission(&self, student_id: u32) -> Option<Submission> {
        self.current().map(|task| task.submission(student_id))
    }

    /// Drop a student's submissions from every task. Returns how many tasks changed.
    pub fn forget_student(&self, student_id: u32) -> usize {
        let (changed, saved) = {
            let mut tasks = write(&self.tasks);
            let mut changed = 0;
            for task in tasks.iter_mut() {
                if task.submissions.remove(&student_id).is_some() {
                    changed += 1;
                }
            }
            let saved = changed == 0 || self.save(&tasks);
            (changed, saved)
        };
        self.report_unsaved(saved);
        if changed > 0 {
            tracing::debug!(student_id, changed, "Forgot student submissions");
        }
        changed
    }

    fn update(&self, id: u32, f: impl FnOnce(&mut Task)) -> Result<Task, DomainError> {
        let (task, saved) = {
            let mut tasks = write(&self.tasks);
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or(DomainError::TaskNotFound(id))?;
            f(task);
            let task = task.clone();
            (task, self.save(&tasks))
        };
        self.report_unsaved(saved);
        Ok(task)
    }

    fn select(&self, id: Option<u32>) -> Result<(), DomainError> {
        self.write_state(CURRENT_TASK_KEY, json!(id))
    }

    fn touch(&self) -> Result<(), DomainError> {
        self.write_state(LAST_MODIFIED_KEY, json!(Utc::now().to_rfc3339()))
    }

    /// State writes that only failed to persist stay in memory and raise a notice.
    fn write_state(&self, key: &str, value: Value) -> Result<(), DomainError> {
        match self.state.set(key, value) {
            Ok(()) => Ok(()),
            Err(StoreError::Persistence(e)) => {
                tracing::warn!(key, "Failed to save state: {}", e);
                notify_unsaved(&self.bus, "state");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the task list and id counter with the task lock held.
    fn save(&self, tasks: &[Task]) -> bool {
        let next_id = self.next_id.load(Ordering::SeqCst);
        let result = save_as(self.port.as_ref(), TASKS_KEY, &tasks)
            .and_then(|()| save_as(self.port.as_ref(), TASKS_NEXT_ID_KEY, &next_id));
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to save tasks: {}", e);
                false
            }
        }
    }

    fn report_unsaved(&self, saved: bool) {
        if !saved {
            notify_unsaved(&self.bus, "tasks");
        }
    }

    fn emit(&self, event: &str, payload: Value) {
        if let Err(e) = self.bus.emit(event, payload) {
            tracing::warn!(event, "Failed to emit: {}", e);
        }
    }
}

impl Module for TaskManager {
    fn init(&self) -> Result<(), ModuleError> {
        let tasks: Vec<Task> = load_as(self.port.as_ref(), TASKS_KEY)?.unwrap_or_default();
        let stored_next: u32 = load_as(self.port.as_ref(), TASKS_NEXT_ID_KEY)?.unwrap_or(1);
        let next_id = tasks
            .iter()
            .map(|t| t.id + 1)
            .max()
            .unwrap_or(1)
            .max(stored_next);
        tracing::info!("Loaded {} tasks", tasks.len());
        let first = tasks.first().map(|t| t.id);
        {
            let mut guard = write(&self.tasks);
            *guard = tasks;
            self.next_id.store(next_id, Ordering::SeqCst);
        }

        if self.current_id().is_none() && self.state.get(CURRENT_TASK_KEY) != Some(json!(first)) {
            self.select(first)
                .map_err(|e| ModuleError::failed(e.to_string()))?;
        }
        Ok(())
    }
}
