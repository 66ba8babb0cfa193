mod compaction;
pub mod db;
mod files;
pub mod models;
mod sequence;
mod tables;

pub use compaction::spawn_compaction;
pub use db::{Database, DatabaseError};
pub use files::TransitionOutcome;
pub use tables::*;
