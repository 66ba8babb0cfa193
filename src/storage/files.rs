use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::FileRecord;
use super::tables::*;
use crate::state_machine::FileState;

/// Result of a state transition attempt
#[derive(Debug)]
pub enum TransitionOutcome {
    /// The record was updated and committed.
    Applied(FileRecord),
    /// The state machine refused the move; nothing was written.
    Rejected { from: FileState },
    NotFound,
}

impl Database {
    // ========================================================================
    // File operations
    // ========================================================================

    /// Store a new file record together with its ownership index entry
    pub fn create_file(&self, file: &FileRecord) -> Result<(), DatabaseError> {
        debug_assert!(!file.id.is_empty(), "file id must not be empty");

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(FILES)?;
            let data = rmp_serde::to_vec_named(file)?;
            table.insert(file.id.as_str(), data.as_slice())?;

            let mut user_table = write_txn.open_table(USER_FILES)?;
            user_table.insert(user_file_key(&file.owner, &file.id).as_str(), ())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a file by its id
    pub fn get_file(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILES)?;

        match table.get(id)? {
            Some(data) => {
                let file: FileRecord = rmp_serde::from_slice(data.value())?;
                Ok(Some(file))
            }
            None => Ok(None),
        }
    }

    /// All files of one owner, in allocation order
    pub fn list_owner_files(&self, owner: &str) -> Result<Vec<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let user_table = read_txn.open_table(USER_FILES)?;
        let files_table = read_txn.open_table(FILES)?;

        // '/' sorts right after '.', so this covers exactly the "<owner>." prefix
        let start = format!("{owner}.");
        let end = format!("{owner}/");

        let mut files = Vec::new();
        for entry in user_table.range(start.as_str()..end.as_str())? {
            let (key, _) = entry?;
            let key = key.value();
            let id = &key[start.len()..];
            // Skip entries of a longer token that shares this prefix ("a" vs "a.b")
            if id.contains('.') {
                continue;
            }
            if let Some(data) = files_table.get(id)? {
                let file: FileRecord = rmp_serde::from_slice(data.value())?;
                files.push(file);
            }
        }

        // Ids past 9999999 outgrow the padding and no longer sort as strings
        files.sort_by(|a, b| (a.id.len(), &a.id).cmp(&(b.id.len(), &b.id)));
        Ok(files)
    }

    /// Move a file to `state` (and optionally record its checksum) in a single transaction
    pub fn transition_file(
        &self,
        id: &str,
        state: FileState,
        checksum: Option<&str>,
    ) -> Result<TransitionOutcome, DatabaseError> {
        let write_txn = self.begin_write()?;

        let existing = {
            let table = write_txn.open_table(FILES)?;
            let result = match table.get(id)? {
                Some(data) => {
                    let file: FileRecord = rmp_serde::from_slice(data.value())?;
                    Some(file)
                }
                None => None,
            };
            result
        };

        let mut file = match existing {
            Some(file) => file,
            None => {
                write_txn.abort()?;
                return Ok(TransitionOutcome::NotFound);
            }
        };

        if !file.state.can_transition_to(state) {
            let from = file.state;
            write_txn.abort()?;
            return Ok(TransitionOutcome::Rejected { from });
        }

        file.state = state;
        if let Some(sum) = checksum {
            file.checksum = Some(sum.to_string());
        }
        file.updated_at = chrono::Utc::now();

        {
            let serialized = rmp_serde::to_vec_named(&file)?;
            let mut table = write_txn.open_table(FILES)?;
            table.insert(id, serialized.as_slice())?;
        }
        write_txn.commit()?;

        Ok(TransitionOutcome::Applied(file))
    }
}
