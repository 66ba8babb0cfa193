use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::FileState;

/// Width of the zero-padded decimal file id
pub const FILE_ID_WIDTH: usize = 7;

/// Format a sequence number as a file id ("0000042").
///
/// Ids are padded to seven digits; larger sequence numbers simply get longer.
pub fn format_file_id(seq: u64) -> String {
    format!("{seq:0width$}", width = FILE_ID_WIDTH)
}

/// A file record stored in redb
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    /// Token of the uploading user
    pub owner: String,
    pub state: FileState,
    /// Hex SHA-256 of the blob, set once the blob is saved
    #[serde(default)]
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// A freshly accepted upload, before its bytes hit the disk.
    pub fn received(
        id: String,
        name: String,
        size: u64,
        content_type: String,
        owner: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            size,
            content_type,
            owner,
            state: FileState::Received,
            checksum: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// State reported in a [`FileEvent`]. `Error` is transient and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    Received,
    Saved,
    Failed,
    Error,
}

impl From<FileState> for EventState {
    fn from(state: FileState) -> Self {
        match state {
            FileState::Received => EventState::Received,
            FileState::Saved => EventState::Saved,
            FileState::Failed => EventState::Failed,
        }
    }
}

/// Payload published on `file` and `user.<token>` topics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    #[serde(rename = "FileID")]
    pub file_id: String,
    #[serde(rename = "State")]
    pub state: EventState,
}
