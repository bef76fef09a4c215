//! Domain managers registered as modules by the composition root.

pub mod students;
pub mod tasks;

pub use students::StudentManager;
pub use tasks::TaskManager;

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::json;

use rollcall_core::EventBus;

use crate::error::DomainError;
use crate::events::APP_NOTICE;

const MAX_NAME_LEN: usize = 64;

/// Trim a display name and check it is 1..=64 characters.
pub(crate) fn normalize_name(name: &str) -> Result<String, DomainError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::InvalidName("name cannot be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::InvalidName(format!(
            "name too long: {} characters (max {})",
            name.chars().count(),
            MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

/// Tell the user a write did not reach storage.
pub(crate) fn notify_unsaved(bus: &EventBus, what: &str) {
    let message = format!("Could not save {}: storage is full or unavailable", what);
    if let Err(e) = bus.emit(APP_NOTICE, json!({ "level": "error", "message": message })) {
        tracing::warn!("Failed to emit notice: {}", e);
    }
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
