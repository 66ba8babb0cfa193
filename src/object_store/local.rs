use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::{ObjectStore, ObjectStoreError};

/// Local filesystem object store.
///
/// Blobs are sharded by the first two 3-character groups of their key, so
/// `0001234` lives at `<base>/000/123/0001234.data`. This bounds the number of
/// entries per directory to a thousand.
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        for segment in [key.get(0..3), key.get(3..6)].into_iter().flatten() {
            path.push(segment);
        }
        path.push(format!("{key}.data"));
        path
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        Ok(())
    }

    fn path(&self, key: &str) -> PathBuf {
        self.object_path(key)
    }
}
