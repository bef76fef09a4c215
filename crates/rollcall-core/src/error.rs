use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Invalid module name: {0}")]
    InvalidName(String),

    #[error("Invalid dependencies for {module}: {reason}")]
    InvalidDependencies { module: String, reason: String },

    #[error("Module already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Module not registered: {0}")]
    NotRegistered(String),

    #[error("Module not initialized: {0}")]
    NotInitialized(String),

    #[error("Circular dependency: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Module {module} cannot start: dependency {dependency} failed")]
    DependencyFailed { module: String, dependency: String },

    #[error("Module {module} requires {dependency}, which is unavailable")]
    MissingDependency { module: String, dependency: String },

    #[error("Module {module} is not a {expected}")]
    TypeMismatch {
        module: String,
        expected: &'static str,
    },

    #[error("Factory for {module} failed: {reason}")]
    FactoryFailed { module: String, reason: String },

    #[error("Module {0} already failed in this initialization pass")]
    AlreadyFailed(String),
}

/// Failure reported by a module factory or a module's `init` hook.
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Failed(String),
}

impl ModuleError {
    pub fn failed(message: impl Into<String>) -> Self {
        ModuleError::Failed(message.into())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusError {
    #[error("Event name cannot be empty")]
    EmptyEventName,
}

/// Failure returned by an event or state listener. Always contained at the
/// dispatch site.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Invalid state key: {0:?}")]
    InvalidKey(String),

    #[error("Invalid import: {0}")]
    InvalidImport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("State was not persisted: {0}")]
    Persistence(#[from] StorageError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Storage quota exceeded: {needed} bytes needed, {limit} available")]
    QuotaExceeded { needed: usize, limit: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_joins_path() {
        let err = RegistryError::Cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Circular dependency: a -> b -> a");
    }

    #[test]
    fn test_storage_error_converts_into_store_error() {
        let err: StoreError = StorageError::QuotaExceeded {
            needed: 10,
            limit: 5,
        }
        .into();
        assert!(matches!(err, StoreError::Persistence(_)));
    }
}
