//! Rollcall DB - redb implementation of the persistence port.

pub mod kv_store;
pub mod tables;

pub use kv_store::RedbPersistence;

use std::path::Path;
use std::sync::Arc;

use redb::Database;

use rollcall_core::StorageError;

/// Open (or create) a database with all required tables.
pub fn init_database(path: impl AsRef<Path>) -> Result<Arc<Database>, StorageError> {
    let db = Database::create(path).map_err(|e| StorageError::Database(e.to_string()))?;

    RedbPersistence::init_tables(&db)?;

    Ok(Arc::new(db))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::PersistencePort;
    use tempfile::tempdir;

    #[test]
    fn test_init_database() {
        let dir = tempdir().unwrap();
        let db = init_database(dir.path().join("test.redb")).unwrap();

        let port = RedbPersistence::new(db);
        assert!(port.keys().unwrap().is_empty());
    }

    #[test]
    fn test_reopen_keeps_tables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.redb");
        {
            let port = RedbPersistence::new(init_database(&path).unwrap());
            assert!(port.set("students", &serde_json::json!([])));
        }
        let port = RedbPersistence::new(init_database(&path).unwrap());
        assert_eq!(port.keys().unwrap(), vec!["students".to_string()]);
    }
}
