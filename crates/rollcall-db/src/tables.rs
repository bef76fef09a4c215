use redb::TableDefinition;

/// Table backing the persistence port.
/// Key: port key (e.g. "appState", "students")
/// Value: serialized JSON value as bytes
pub const KV_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");
