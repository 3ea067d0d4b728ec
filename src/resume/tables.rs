use redb::TableDefinition;

/// Resume records: fingerprint -> ResumeRecord (msgpack)
pub const UPLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("uploads");
