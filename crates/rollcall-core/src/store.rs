//! Keyed reactive state with write-through persistence.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{ListenerId, WILDCARD};
use crate::error::{ModuleError, StoreError};
use crate::registry::Module;
use crate::storage::PersistencePort;
use crate::validation::Validator;

pub type StateMap = Map<String, Value>;

/// Port key the store persists its mapping under unless configured otherwise.
pub const DEFAULT_STATE_KEY: &str = "appState";

type StateFn = dyn Fn(&Value, &Value) + Send + Sync;

#[derive(Clone)]
struct StateListener {
    id: ListenerId,
    callback: Arc<StateFn>,
}

/// Process-wide keyed state merged over compiled-in defaults.
///
/// Every mutation is persisted in full through the [`PersistencePort`] and
/// then reported to listeners of the changed keys as `(new, old)`, and to
/// wildcard listeners as `(full_new, full_old)`. No lock is held while
/// listeners run, so they may read or write the store.
pub struct StateStore {
    port: Arc<dyn PersistencePort>,
    storage_key: String,
    defaults: StateMap,
    state: RwLock<Option<StateMap>>,
    listeners: RwLock<HashMap<String, Vec<StateListener>>>,
}

impl StateStore {
    pub fn new(port: Arc<dyn PersistencePort>, defaults: StateMap) -> Self {
        Self::with_storage_key(port, defaults, DEFAULT_STATE_KEY)
    }

    pub fn with_storage_key(
        port: Arc<dyn PersistencePort>,
        defaults: StateMap,
        storage_key: impl Into<String>,
    ) -> Self {
        Self {
            port,
            storage_key: storage_key.into(),
            defaults,
            state: RwLock::new(None),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, Option<StateMap>> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Load persisted state over the defaults. Only the first call loads;
    /// returns whether this call did.
    pub fn init(&self) -> bool {
        let mut state = self.state_mut();
        if state.is_some() {
            return false;
        }
        *state = Some(self.load());
        true
    }

    fn load(&self) -> StateMap {
        let mut merged = self.defaults.clone();
        match self.port.load(&self.storage_key) {
            Ok(Some(Value::Object(stored))) => {
                merged.extend(stored);
                info!(key = %self.storage_key, "State loaded");
            }
            Ok(Some(_)) => {
                warn!(key = %self.storage_key, "Stored state is not an object, using defaults");
            }
            Ok(None) => debug!(key = %self.storage_key, "No stored state, using defaults"),
            Err(e) => {
                warn!(key = %self.storage_key, error = %e, "Failed to load state, using defaults");
            }
        }
        merged
    }

    /// Run `f` on the loaded mapping, loading it first if needed.
    fn with_state<R>(&self, f: impl FnOnce(&mut StateMap) -> R) -> R {
        let mut guard = self.state_mut();
        let state = guard.get_or_insert_with(|| self.load());
        f(state)
    }

    /// Copy of the whole mapping.
    pub fn get_state(&self) -> StateMap {
        self.with_state(|state| state.clone())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.with_state(|state| state.get(key).cloned())
    }

    /// Shallow-merge `updates`, persist, then notify.
    ///
    /// A persistence failure leaves the merged values in memory, still
    /// notifies, and is returned as `StoreError::Persistence`.
    pub fn set_state(&self, updates: StateMap) -> Result<(), StoreError> {
        for key in updates.keys() {
            Validator::validate_state_key(key)?;
        }

        // Persist under the lock so concurrent writers reach storage in the
        // same order they changed memory.
        let (old, new, persisted) = self.with_state(|state| {
            let old = state.clone();
            for (key, value) in &updates {
                state.insert(key.clone(), value.clone());
            }
            let persisted = self.persist(state);
            (old, state.clone(), persisted)
        });

        self.notify(updates.keys(), &old, &new);
        persisted
    }

    /// Set a single key.
    pub fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut updates = StateMap::new();
        updates.insert(key.to_string(), value);
        self.set_state(updates)
    }

    /// Restore the defaults and notify wildcard listeners with an empty old state.
    pub fn reset(&self) -> Result<(), StoreError> {
        let (new, persisted) = self.with_state(|state| {
            *state = self.defaults.clone();
            (state.clone(), self.persist(state))
        });

        self.notify_wildcard(&new, &StateMap::new());
        info!("State reset to defaults");
        persisted
    }

    /// Serialize the whole mapping.
    pub fn export(&self) -> Result<String, StoreError> {
        let state = self.get_state();
        serde_json::to_string(&state).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Replace the state with `text` merged over the defaults.
    ///
    /// On any parse or validation failure the current state is untouched.
    pub fn import(&self, text: &str) -> Result<(), StoreError> {
        let parsed: Value =
            serde_json::from_str(text).map_err(|e| StoreError::InvalidImport(e.to_string()))?;
        let Value::Object(imported) = parsed else {
            return Err(StoreError::InvalidImport(
                "expected a JSON object".to_string(),
            ));
        };
        for key in imported.keys() {
            Validator::validate_state_key(key)?;
        }

        let mut merged = self.defaults.clone();
        merged.extend(imported);

        let (old, persisted) = self.with_state(|state| {
            let old = std::mem::replace(state, merged.clone());
            (old, self.persist(state))
        });

        let changed: Vec<&String> = merged
            .iter()
            .filter(|(key, value)| old.get(key.as_str()) != Some(*value))
            .map(|(key, _)| key)
            .collect();
        self.notify(changed.into_iter(), &old, &merged);
        info!("State imported");
        persisted
    }

    fn persist(&self, state: &StateMap) -> Result<(), StoreError> {
        self.port
            .save(&self.storage_key, &Value::Object(state.clone()))
            .map_err(|e| {
                warn!(key = %self.storage_key, error = %e, "Failed to persist state");
                StoreError::from(e)
            })
    }

    /// Subscribe to one key, or to the whole state with `*`.
    pub fn add_listener<F>(&self, key: &str, f: F) -> ListenerId
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        let listener = StateListener {
            id: Uuid::new_v4(),
            callback: Arc::new(f),
        };
        let id = listener.id;
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.to_string())
            .or_default()
            .push(listener);
        debug!(key, %id, "State listener added");
        id
    }

    /// Remove a listener by id, whichever key it was registered under.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        for list in listeners.values_mut() {
            if let Some(pos) = list.iter().position(|l| l.id == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn listener_count(&self, key: &str) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map_or(0, Vec::len)
    }

    fn snapshot(&self, key: &str) -> Vec<StateListener> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    fn notify<'a>(&self, keys: impl Iterator<Item = &'a String>, old: &StateMap, new: &StateMap) {
        for key in keys {
            let new_value = new.get(key).cloned().unwrap_or(Value::Null);
            let old_value = old.get(key).cloned().unwrap_or(Value::Null);
            for listener in self.snapshot(key) {
                Self::invoke(&listener, key, &new_value, &old_value);
            }
        }
        self.notify_wildcard(new, old);
    }

    fn notify_wildcard(&self, new: &StateMap, old: &StateMap) {
        let listeners = self.snapshot(WILDCARD);
        if listeners.is_empty() {
            return;
        }
        let new = Value::Object(new.clone());
        let old = Value::Object(old.clone());
        for listener in listeners {
            Self::invoke(&listener, WILDCARD, &new, &old);
        }
    }

    fn invoke(listener: &StateListener, key: &str, new: &Value, old: &Value) {
        let callback = &listener.callback;
        if catch_unwind(AssertUnwindSafe(|| callback(new, old))).is_err() {
            warn!(key, listener = %listener.id, "State listener panicked");
        }
    }
}

impl Module for StateStore {
    fn init(&self) -> Result<(), ModuleError> {
        StateStore::init(self);
        Ok(())
    }
}
