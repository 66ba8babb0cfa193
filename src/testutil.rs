//! Shared test helpers for in-crate router tests.

use std::sync::Arc;

use crate::bus::EventBus;
use crate::config::{AuthConfig, BusConfig, Config, NodeConfig, StorageConfig, UploadConfig};
use crate::object_store::LocalStore;
use crate::storage::Database;
use crate::upload::UploadService;
use crate::AppState;

/// Create a test AppState with a temporary database, blob store and a running bus.
pub fn test_state(temp_dir: &tempfile::TempDir) -> Arc<AppState> {
    let data_dir = temp_dir.path().join("cache");
    let blob_dir = temp_dir.path().join("data");

    let config = Config {
        auth: AuthConfig::default(),
        bus: BusConfig::default(),
        node: NodeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: data_dir.to_string_lossy().to_string(),
            asset_dir: temp_dir.path().join("html").to_string_lossy().to_string(),
        },
        storage: StorageConfig {
            blob_dir: blob_dir.to_string_lossy().to_string(),
            ..Default::default()
        },
        upload: UploadConfig::default(),
        max_upload_size: 1024 * 1024, // 1MB for tests
    };

    let db = Database::open(&data_dir).expect("Failed to open test database");
    let blobs = LocalStore::new(&blob_dir).expect("Failed to create test blob store");
    let (bus, _hub) = EventBus::start(config.bus.clone());
    let uploads = UploadService::new(db, Arc::new(blobs), bus.clone(), &config.upload);

    Arc::new(AppState {
        config,
        bus,
        uploads,
    })
}
