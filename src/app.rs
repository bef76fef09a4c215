//! Composition root: builds the module graph, wires events, owns teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use rollcall_core::{
    Dispatch, EventBus, InitReport, ListenerError, ListenerId, ModuleInfo, ModuleRegistry,
    PersistencePort, StateMap, StateStore, Storage, StoreError, DEFAULT_STATE_KEY, WILDCARD,
};

use crate::error::{AppError, DomainError};
use crate::events::*;
use crate::managers::{StudentManager, TaskManager};
use crate::models::{Submission, Task};
use crate::view::RosterView;

pub const STORAGE_MODULE: &str = "storage";
pub const BUS_MODULE: &str = "eventBus";
pub const STATE_MODULE: &str = "state";
pub const STUDENTS_MODULE: &str = "students";
pub const TASKS_MODULE: &str = "tasks";
pub const UI_MODULE: &str = "ui";

/// Modules the application cannot run without.
const CRITICAL_MODULES: &[&str] = &[STORAGE_MODULE, STATE_MODULE];

/// Domain handlers run before the view re-renders.
const HANDLER_PRIORITY: i32 = 10;
const RENDER_PRIORITY: i32 = 0;

/// Defaults every state key falls back to.
pub fn default_state() -> StateMap {
    let mut state = StateMap::new();
    state.insert("currentTaskId".to_string(), Value::Null);
    state.insert("sortBy".to_string(), json!("number"));
    state.insert("showScores".to_string(), json!(true));
    state.insert("lastModified".to_string(), Value::Null);
    state
}

pub struct CompositionRoot {
    port: Arc<dyn PersistencePort>,
    registry: ModuleRegistry,
    bus: Arc<EventBus>,
    state: Arc<StateStore>,
    state_listeners: Mutex<Vec<ListenerId>>,
    started: AtomicBool,
}

impl CompositionRoot {
    pub fn new(port: Arc<dyn PersistencePort>) -> Self {
        Self::with_state_key(port, DEFAULT_STATE_KEY)
    }

    pub fn with_state_key(port: Arc<dyn PersistencePort>, state_key: &str) -> Self {
        let state = StateStore::with_storage_key(port.clone(), default_state(), state_key);
        Self {
            port,
            registry: ModuleRegistry::new(),
            bus: Arc::new(EventBus::new()),
            state: Arc::new(state),
            state_listeners: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Register and initialize every module, then wire events.
    ///
    /// Fails only when a critical module could not be initialized; any other
    /// failed module is logged and the application runs without it.
    pub fn start(&self) -> Result<InitReport, AppError> {
        if self.registry.is_empty() {
            self.register_modules()?;
        }

        let report = self.registry.init_all();
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Already started");
            return Ok(report);
        }

        let critical: Vec<String> = report
            .failed
            .iter()
            .filter(|name| CRITICAL_MODULES.contains(&name.as_str()))
            .cloned()
            .collect();
        if !critical.is_empty() {
            tracing::error!(modules = ?critical, "Critical modules failed to initialize");
            self.started.store(false, Ordering::SeqCst);
            return Err(AppError::Startup(critical));
        }
        if !report.failed.is_empty() {
            tracing::warn!(modules = ?report.failed, "Running without some modules");
        }

        self.wire();
        self.emit(APP_INITIALIZED, json!({ "modules": report.initialized }))?;
        tracing::info!(modules = report.initialized.len(), "Application started");
        Ok(report)
    }

    fn register_modules(&self) -> Result<(), AppError> {
        let port = self.port.clone();
        self.registry.register(STORAGE_MODULE, &[], move |_| {
            Ok(Arc::new(Storage::new(port.clone())))
        })?;

        let bus = self.bus.clone();
        self.registry
            .register(BUS_MODULE, &[], move |_| Ok(bus.clone()))?;

        let state = self.state.clone();
        self.registry
            .register(STATE_MODULE, &[STORAGE_MODULE], move |_| Ok(state.clone()))?;

        self.registry
            .register(STUDENTS_MODULE, &[STORAGE_MODULE, BUS_MODULE], |deps| {
                let storage = deps.require::<Storage>(STORAGE_MODULE)?;
                let bus = deps.require::<EventBus>(BUS_MODULE)?;
                Ok(Arc::new(StudentManager::new(storage.port(), bus)))
            })?;

        self.registry.register(
            TASKS_MODULE,
            &[STORAGE_MODULE, BUS_MODULE, STATE_MODULE],
            |deps| {
                let storage = deps.require::<Storage>(STORAGE_MODULE)?;
                let bus = deps.require::<EventBus>(BUS_MODULE)?;
                let state = deps.require::<StateStore>(STATE_MODULE)?;
                Ok(Arc::new(TaskManager::new(storage.port(), bus, state)))
            },
        )?;

        self.registry.register_tolerant(
            UI_MODULE,
            &[STUDENTS_MODULE, TASKS_MODULE, STATE_MODULE],
            |deps| {
                Ok(Arc::new(RosterView::new(
                    deps.optional(STUDENTS_MODULE),
                    deps.optional(TASKS_MODULE),
                    deps.optional(STATE_MODULE),
                )))
            },
        )?;

        Ok(())
    }

    fn wire(&self) {
        if let Ok(tasks) = self.tasks() {
            self.handle(STUDENT_TOGGLE, {
                let tasks = tasks.clone();
                move |payload: &Value| {
                    let id = id_field(payload, "studentId")?;
                    let submission = tasks
                        .toggle_submission(id)
                        .map_err(|e| ListenerError::new(e.to_string()))?;
                    Ok(json!(submission))
                }
            });

            self.handle(TASK_SWITCH, {
                let tasks = tasks.clone();
                move |payload: &Value| {
                    let id = id_field(payload, "taskId")?;
                    let task = tasks
                        .switch(id)
                        .map_err(|e| ListenerError::new(e.to_string()))?;
                    Ok(json!(task))
                }
            });

            self.handle(STUDENT_REMOVED, move |payload: &Value| {
                let id = id_field(payload, "id")?;
                tasks.forget_student(id);
                Ok(Value::Null)
            });
        }

        if let Ok(view) = self.view() {
            self.handle(APP_NOTICE, {
                let view = view.clone();
                move |payload: &Value| {
                    let level = payload["level"].as_str().unwrap_or("info");
                    let message = payload["message"].as_str().unwrap_or_default();
                    view.show_notice(level, message);
                    Ok(Value::Null)
                }
            });

            for event in [
                STUDENT_TOGGLE,
                TASK_SWITCH,
                STATE_CHANGE,
                APP_NOTICE,
                STUDENT_ADDED,
                STUDENT_UPDATED,
                STUDENT_REMOVED,
                TASK_ADDED,
                TASK_UPDATED,
                TASK_REMOVED,
            ] {
                let view = view.clone();
                self.subscribe(event, RENDER_PRIORITY, move |_: &Value| {
                    view.render();
                    Ok(Value::Null)
                });
            }
        }

        let bus = self.bus.clone();
        let id = self.state.add_listener(WILDCARD, move |state, previous| {
            let payload = json!({ "state": state, "previous": previous });
            if let Err(e) = bus.emit(STATE_CHANGE, payload) {
                tracing::warn!("Failed to emit state change: {}", e);
            }
        });
        self.lock_listeners().push(id);

        tracing::debug!("Events wired");
    }

    fn handle<F>(&self, event: &str, f: F)
    where
        F: Fn(&Value) -> Result<Value, ListenerError> + Send + Sync + 'static,
    {
        self.subscribe(event, HANDLER_PRIORITY, f);
    }

    fn subscribe<F>(&self, event: &str, priority: i32, f: F)
    where
        F: Fn(&Value) -> Result<Value, ListenerError> + Send + Sync + 'static,
    {
        if let Err(e) = self.bus.on_priority(event, priority, f) {
            tracing::warn!(event, "Failed to subscribe: {}", e);
        }
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<ListenerId>> {
        self.state_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn emit(&self, event: &str, payload: Value) -> Result<Dispatch, AppError> {
        let dispatch = self.bus.emit(event, payload)?;
        for failure in &dispatch.failures {
            tracing::warn!(event, listener = %failure.listener, "Listener failed: {}", failure.error);
        }
        Ok(dispatch)
    }

    /// Emit a request event and take the handler's answer.
    fn request(&self, event: &'static str, payload: Value) -> Result<Value, AppError> {
        let dispatch = self.emit(event, payload)?;
        if let Some(failure) = dispatch.failures.first() {
            return Err(AppError::Rejected(failure.error.clone()));
        }
        dispatch
            .first_value()
            .cloned()
            .ok_or(AppError::Unhandled(event))
    }

    /// Toggle a student's submission on the current task through the bus.
    pub fn toggle_student(&self, student_id: u32) -> Result<Submission, AppError> {
        if self.students()?.get(student_id).is_none() {
            return Err(DomainError::StudentNotFound(student_id).into());
        }
        if self.tasks()?.current_id().is_none() {
            return Err(DomainError::NoCurrentTask.into());
        }
        let value = self.request(STUDENT_TOGGLE, json!({ "studentId": student_id }))?;
        serde_json::from_value(value).map_err(|e| AppError::Rejected(e.to_string()))
    }

    /// Set or clear a score on the current task for a known student.
    pub fn set_score(&self, student_id: u32, score: Option<u8>) -> Result<Submission, AppError> {
        if self.students()?.get(student_id).is_none() {
            return Err(DomainError::StudentNotFound(student_id).into());
        }
        Ok(self.tasks()?.set_score(student_id, score)?)
    }

    /// Select the current task through the bus.
    pub fn switch_task(&self, task_id: u32) -> Result<Task, AppError> {
        if self.tasks()?.get(task_id).is_none() {
            return Err(DomainError::TaskNotFound(task_id).into());
        }
        let value = self.request(TASK_SWITCH, json!({ "taskId": task_id }))?;
        serde_json::from_value(value).map_err(|e| AppError::Rejected(e.to_string()))
    }

    /// Merge `updates` into the state. A write that only failed to persist
    /// is kept in memory and reported as a notice.
    pub fn set_state(&self, updates: StateMap) -> Result<StateMap, AppError> {
        self.tolerate_unsaved(self.state.set_state(updates))?;
        Ok(self.state.get_state())
    }

    pub fn reset_state(&self) -> Result<StateMap, AppError> {
        self.tolerate_unsaved(self.state.reset())?;
        Ok(self.state.get_state())
    }

    pub fn export_state(&self) -> Result<String, AppError> {
        Ok(self.state.export()?)
    }

    pub fn import_state(&self, text: &str) -> Result<StateMap, AppError> {
        self.tolerate_unsaved(self.state.import(text))?;
        Ok(self.state.get_state())
    }

    fn tolerate_unsaved(&self, result: Result<(), StoreError>) -> Result<(), AppError> {
        match result {
            Err(StoreError::Persistence(e)) => {
                tracing::warn!("State not saved: {}", e);
                self.emit(
                    APP_NOTICE,
                    json!({ "level": "error", "message": "Could not save settings" }),
                )?;
                Ok(())
            }
            other => Ok(other?),
        }
    }

    pub fn students(&self) -> Result<Arc<StudentManager>, AppError> {
        self.registry
            .get_as(STUDENTS_MODULE)
            .ok_or(AppError::Unavailable(STUDENTS_MODULE))
    }

    pub fn tasks(&self) -> Result<Arc<TaskManager>, AppError> {
        self.registry
            .get_as(TASKS_MODULE)
            .ok_or(AppError::Unavailable(TASKS_MODULE))
    }

    pub fn view(&self) -> Result<Arc<RosterView>, AppError> {
        self.registry
            .get_as(UI_MODULE)
            .ok_or(AppError::Unavailable(UI_MODULE))
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.registry.modules()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Announce teardown, destroy modules in reverse order and drop every
    /// subscription. The root can be started again afterwards.
    pub fn shutdown(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.emit(APP_DESTROY, Value::Null) {
            tracing::warn!("Failed to emit destroy: {}", e);
        }
        self.registry.shutdown();

        for id in self.lock_listeners().drain(..) {
            self.state.remove_listener(id);
        }
        let removed = self.bus.clear();
        tracing::info!(listeners = removed, "Application shut down");
    }
}

/// Read a numeric id out of an event payload.
fn id_field(payload: &Value, key: &str) -> Result<u32, ListenerError> {
    payload[key]
        .as_u64()
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| ListenerError::new(format!("payload is missing a numeric {}", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::InMemoryPersistence;

    fn started() -> CompositionRoot {
        let root = CompositionRoot::new(Arc::new(InMemoryPersistence::new()));
        root.start().unwrap();
        root
    }

    #[test]
    fn test_start_initializes_dependencies_first() {
        let root = started();
        let order = root.registry().initialization_order();
        let position = |name: &str| order.iter().position(|n| n == name).unwrap();

        assert_eq!(order.len(), 6);
        assert!(position(STORAGE_MODULE) < position(STATE_MODULE));
        assert!(position(STATE_MODULE) < position(TASKS_MODULE));
        assert!(position(TASKS_MODULE) < position(UI_MODULE));
        assert!(root.is_started());
    }

    #[test]
    fn test_start_twice_does_not_rewire() {
        let root = started();
        let before = root.bus().listener_count(STUDENT_TOGGLE);
        root.start().unwrap();
        assert_eq!(root.bus().listener_count(STUDENT_TOGGLE), before);
    }

    #[test]
    fn test_id_field() {
        assert_eq!(id_field(&json!({"taskId": 3}), "taskId"), Ok(3));
        assert!(id_field(&json!({"taskId": "3"}), "taskId").is_err());
        assert!(id_field(&json!({}), "taskId").is_err());
    }

    #[test]
    fn test_toggle_unknown_student() {
        let root = started();
        assert!(matches!(
            root.toggle_student(4),
            Err(AppError::Domain(DomainError::StudentNotFound(4)))
        ));
    }

    #[test]
    fn test_set_score_checks_student() {
        let root = started();
        let ada = root.students().unwrap().add("Ada", None).unwrap();
        root.tasks().unwrap().add("Essay").unwrap();

        assert!(matches!(
            root.set_score(7, Some(50)),
            Err(AppError::Domain(DomainError::StudentNotFound(7)))
        ));
        assert!(root.tasks().unwrap().current().unwrap().submissions.is_empty());
        assert_eq!(root.set_score(ada.id, Some(50)).unwrap().score, Some(50));
    }

    #[test]
    fn test_removed_student_is_forgotten_by_tasks() {
        let root = started();
        let students = root.students().unwrap();
        let tasks = root.tasks().unwrap();
        let ada = students.add("Ada", None).unwrap();
        tasks.add("Essay").unwrap();
        root.toggle_student(ada.id).unwrap();

        students.remove(ada.id).unwrap();

        assert_eq!(tasks.current().unwrap().submitted_count(), 0);
    }

    #[test]
    fn test_state_changes_are_reemitted() {
        let root = started();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        root.bus()
            .on(STATE_CHANGE, move |payload: &Value| {
                sink.lock().unwrap().push(payload["state"]["sortBy"].clone());
                Ok(Value::Null)
            })
            .unwrap();

        let mut updates = StateMap::new();
        updates.insert("sortBy".to_string(), json!("name"));
        root.set_state(updates).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![json!("name")]);
    }
}
