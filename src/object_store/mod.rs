mod local;

pub use local::LocalStore;

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage for raw upload blobs.
/// Keys are file ids. A blob means nothing without its metadata record.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError>;
    /// Location of the blob for `key`, whether or not it has been written yet.
    fn path(&self, key: &str) -> PathBuf;
}
