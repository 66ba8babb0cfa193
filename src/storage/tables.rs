use redb::TableDefinition;

/// File records: id -> FileRecord (msgpack)
pub const FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("files");

/// Ownership index: "<owner>.<id>" -> marker (for per-user listings)
pub const USER_FILES: TableDefinition<&str, ()> = TableDefinition::new("user_files");

/// Named counters: name -> next value to hand out
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Counter backing file ids
pub const FILE_ID_SEQUENCE: &str = "file_id";

/// Ownership index key for a file.
pub fn user_file_key(owner: &str, id: &str) -> String {
    format!("{owner}.{id}")
}
