use std::collections::HashSet;

use crate::bus::WILDCARD;
use crate::error::{BusError, RegistryError, StoreError};

/// Validator for names that flow into the registry, the bus and the store.
pub struct Validator;

impl Validator {
    /// Validate a module name.
    /// Must be non-empty, max 64 chars, and only contain [a-zA-Z0-9_-:].
    pub fn validate_module_name(name: &str) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::InvalidName(
                "module name cannot be empty".to_string(),
            ));
        }
        if name.len() > 64 {
            return Err(RegistryError::InvalidName(format!(
                "module name too long: {} chars (max 64)",
                name.len()
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ':')
        {
            return Err(RegistryError::InvalidName(format!(
                "module name contains invalid characters: {}",
                name
            )));
        }
        Ok(())
    }

    /// Validate a declared dependency list.
    /// Every entry must be a valid module name, distinct, and not the module itself.
    pub fn validate_dependencies(module: &str, dependencies: &[&str]) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for dep in dependencies {
            Self::validate_module_name(dep).map_err(|e| RegistryError::InvalidDependencies {
                module: module.to_string(),
                reason: e.to_string(),
            })?;
            if *dep == module {
                return Err(RegistryError::InvalidDependencies {
                    module: module.to_string(),
                    reason: "module cannot depend on itself".to_string(),
                });
            }
            if !seen.insert(*dep) {
                return Err(RegistryError::InvalidDependencies {
                    module: module.to_string(),
                    reason: format!("duplicate dependency: {}", dep),
                });
            }
        }
        Ok(())
    }

    /// Validate an event name. The wildcard is a valid event name.
    pub fn validate_event_name(event: &str) -> Result<(), BusError> {
        if event.trim().is_empty() {
            return Err(BusError::EmptyEventName);
        }
        Ok(())
    }

    /// Validate a state key. The wildcard is reserved for whole-state listeners.
    pub fn validate_state_key(key: &str) -> Result<(), StoreError> {
        if key.is_empty() || key == WILDCARD {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_module_name() {
        assert!(Validator::validate_module_name("storage").is_ok());
        assert!(Validator::validate_module_name("eventBus").is_ok());
        assert!(Validator::validate_module_name("ui_grid-2").is_ok());
    }

    #[test]
    fn test_invalid_module_name() {
        assert!(Validator::validate_module_name("").is_err());
        assert!(Validator::validate_module_name("has space").is_err());
        assert!(Validator::validate_module_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_dependencies_reject_self_reference() {
        let err = Validator::validate_dependencies("students", &["storage", "students"]);
        assert!(matches!(
            err,
            Err(RegistryError::InvalidDependencies { .. })
        ));
    }

    #[test]
    fn test_dependencies_reject_duplicates() {
        assert!(Validator::validate_dependencies("tasks", &["storage", "storage"]).is_err());
        assert!(Validator::validate_dependencies("tasks", &["storage", "state"]).is_ok());
        assert!(Validator::validate_dependencies("tasks", &[]).is_ok());
    }

    #[test]
    fn test_event_name() {
        assert!(Validator::validate_event_name("student:toggle").is_ok());
        assert!(Validator::validate_event_name("*").is_ok());
        assert_eq!(
            Validator::validate_event_name("  "),
            Err(BusError::EmptyEventName)
        );
    }

    #[test]
    fn test_state_key() {
        assert!(Validator::validate_state_key("currentTaskId").is_ok());
        assert!(Validator::validate_state_key("*").is_err());
        assert!(Validator::validate_state_key("").is_err());
    }
}
