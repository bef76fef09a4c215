use std::sync::Arc;

use redb::{Database, ReadableTable};
use serde_json::Value;

use rollcall_core::{PersistencePort, StorageError};

use crate::tables::KV_TABLE;

/// redb implementation of PersistencePort.
///
/// Every `save` is its own committed write transaction, so the last write
/// wins and survives a restart.
pub struct RedbPersistence {
    db: Arc<Database>,
}

impl RedbPersistence {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Initialize the database tables.
    pub fn init_tables(db: &Database) -> Result<(), StorageError> {
        let write_txn = db
            .begin_write()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        {
            let _ = write_txn
                .open_table(KV_TABLE)
                .map_err(|e| StorageError::Database(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }
}

impl PersistencePort for RedbPersistence {
    fn load(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let table = read_txn
            .open_table(KV_TABLE)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        match table
            .get(key)
            .map_err(|e| StorageError::Database(e.to_string()))?
        {
            Some(value) => {
                let value: Value = serde_json::from_slice(value.value()).map_err(|e| {
                    StorageError::Serialization {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn save(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        {
            let mut table = write_txn
                .open_table(KV_TABLE)
                .map_err(|e| StorageError::Database(e.to_string()))?;

            table
                .insert(key, bytes.as_slice())
                .map_err(|e| StorageError::Database(e.to_string()))?;
        }

        write_txn
            .commit()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        tracing::debug!(key, bytes = bytes.len(), "Value saved");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let removed;
        {
            let mut table = write_txn
                .open_table(KV_TABLE)
                .map_err(|e| StorageError::Database(e.to_string()))?;

            let result = table
                .remove(key)
                .map_err(|e| StorageError::Database(e.to_string()))?;
            removed = result.is_some();
        }

        write_txn
            .commit()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(removed)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let table = read_txn
            .open_table(KV_TABLE)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let mut keys = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| StorageError::Database(e.to_string()))?
        {
            let (key, _) = entry.map_err(|e| StorageError::Database(e.to_string()))?;
            keys.push(key.value().to_string());
        }

        Ok(keys)
    }
}
