//! Lifecycle of an uploaded file.
//!
//! ```text
//! received ──► saved
//!     │
//!     └──────► failed   (only when failures are persisted)
//! ```
//!
//! States only move forward. `saved` and `failed` are terminal.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Received,
    Saved,
    Failed,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Received => "received",
            FileState::Saved => "saved",
            FileState::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: FileState) -> bool {
        matches!(
            (self, next),
            (FileState::Received, FileState::Saved) | (FileState::Received, FileState::Failed)
        )
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
