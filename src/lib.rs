//! sfs - a small file upload service
//!
//! This crate accepts uploads over HTTP and keeps listeners informed about them:
//! - redb embedded database for file metadata, ownership index and id sequence
//! - Sharded on-disk blob storage written by a bounded pool of background tasks
//! - In-process topic event bus with fire-once backlogs for late subscribers
//! - Websocket push of per-user and per-request events

pub mod api;
pub mod bus;
pub mod config;
pub mod context;
pub mod object_store;
pub mod state_machine;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod upload;
pub mod widget;

use bus::EventBus;
use config::Config;
use upload::UploadService;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub bus: EventBus,
    pub uploads: UploadService,
}
