use std::ops::Deref;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::StorageError;
use crate::registry::Module;

/// Trait for the local synchronous key-value store that backs the state
/// store and the domain managers.
///
/// The required methods report failures as `StorageError`. The provided
/// accessors (`get`, `set`, ...) log the failure and degrade to a default or
/// a boolean, which is what most callers want.
pub trait PersistencePort: Send + Sync {
    /// Load the value stored under `key`.
    fn load(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    fn save(&self, key: &str, value: &Value) -> Result<(), StorageError>;

    /// Remove `key`. Returns Ok(true) if something was removed.
    fn remove(&self, key: &str) -> Result<bool, StorageError>;

    /// List every stored key.
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Get the value under `key`, or None when absent or unreadable.
    fn get(&self, key: &str) -> Option<Value> {
        match self.load(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read from storage");
                None
            }
        }
    }

    /// Get the value under `key`, falling back to `default`.
    fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Store a value. Returns false on failure (e.g. quota exceeded).
    fn set(&self, key: &str, value: &Value) -> bool {
        match self.save(key, value) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to write to storage");
                false
            }
        }
    }

    /// Remove a value. Returns false if nothing was removed or removal failed.
    fn delete(&self, key: &str) -> bool {
        match self.remove(key) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to remove from storage");
                false
            }
        }
    }
}

/// Load and deserialize the value under `key`.
pub fn load_as<T: DeserializeOwned>(
    port: &dyn PersistencePort,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match port.load(key)? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StorageError::Serialization {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Serialize `value` and store it under `key`.
pub fn save_as<T: Serialize>(
    port: &dyn PersistencePort,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let value = serde_json::to_value(value).map_err(|e| StorageError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    port.save(key, &value)
}

/// The persistence port as a registrable module.
#[derive(Clone)]
pub struct Storage {
    port: Arc<dyn PersistencePort>,
}

impl Storage {
    pub fn new(port: Arc<dyn PersistencePort>) -> Self {
        Self { port }
    }

    /// Shared handle to the underlying port.
    pub fn port(&self) -> Arc<dyn PersistencePort> {
        self.port.clone()
    }
}

impl Deref for Storage {
    type Target = dyn PersistencePort;

    fn deref(&self) -> &Self::Target {
        self.port.as_ref()
    }
}

impl Module for Storage {}

// In-memory implementation for testing
#[cfg(any(test, feature = "test-utils"))]
pub mod memory {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::RwLock;

    /// In-memory persistence port for testing.
    #[derive(Default)]
    pub struct InMemoryPersistence {
        entries: RwLock<BTreeMap<String, Value>>,
        quota: Option<usize>,
    }

    impl InMemoryPersistence {
        pub fn new() -> Self {
            Self::default()
        }

        /// Reject writes once the serialized size of all entries would exceed `bytes`.
        pub fn with_quota(bytes: usize) -> Self {
            Self {
                entries: RwLock::new(BTreeMap::new()),
                quota: Some(bytes),
            }
        }

        fn size_of(key: &str, value: &Value) -> usize {
            key.len() + value.to_string().len()
        }
    }

    impl PersistencePort for InMemoryPersistence {
        fn load(&self, key: &str) -> Result<Option<Value>, StorageError> {
            Ok(self.entries.read().unwrap().get(key).cloned())
        }

        fn save(&self, key: &str, value: &Value) -> Result<(), StorageError> {
            let mut entries = self.entries.write().unwrap();

            if let Some(limit) = self.quota {
                let others: usize = entries
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| Self::size_of(k, v))
                    .sum();
                let needed = others + Self::size_of(key, value);
                if needed > limit {
                    return Err(StorageError::QuotaExceeded { needed, limit });
                }
            }

            entries.insert(key.to_string(), value.clone());
            Ok(())
        }

        fn remove(&self, key: &str) -> Result<bool, StorageError> {
            Ok(self.entries.write().unwrap().remove(key).is_some())
        }

        fn keys(&self) -> Result<Vec<String>, StorageError> {
            Ok(self.entries.read().unwrap().keys().cloned().collect())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use serde_json::json;

        #[test]
        fn test_set_and_get() {
            let port = InMemoryPersistence::new();
            assert!(port.set("students", &json!([{"id": 1}])));
            assert_eq!(port.get("students"), Some(json!([{"id": 1}])));
            assert_eq!(port.get_or("tasks", json!([])), json!([]));
        }

        #[test]
        fn test_quota_reports_boolean_failure() {
            let port = InMemoryPersistence::with_quota(16);
            assert!(port.set("a", &json!("short")));
            assert!(!port.set("b", &json!("this value is far too long")));
            assert_eq!(port.get("b"), None);

            // Overwriting an existing key only counts the new value.
            assert!(port.set("a", &json!("tiny")));
        }

        #[test]
        fn test_delete_and_keys() {
            let port = InMemoryPersistence::new();
            port.set("x", &json!(1));
            port.set("y", &json!(2));
            assert_eq!(port.keys().unwrap(), vec!["x".to_string(), "y".to_string()]);
            assert!(port.delete("x"));
            assert!(!port.delete("x"));
        }

        #[test]
        fn test_typed_helpers() {
            let port = InMemoryPersistence::new();
            save_as(&port, "numbers", &vec![1u32, 2, 3]).unwrap();
            let numbers: Option<Vec<u32>> = load_as(&port, "numbers").unwrap();
            assert_eq!(numbers, Some(vec![1, 2, 3]));

            port.set("bad", &json!("not a list"));
            assert!(load_as::<Vec<u32>>(&port, "bad").is_err());
        }

        #[test]
        fn test_storage_module_derefs_to_port() {
            let storage = Storage::new(Arc::new(InMemoryPersistence::new()));
            assert!(storage.set("key", &json!(true)));
            assert_eq!(storage.get("key"), Some(json!(true)));
        }
    }
}
