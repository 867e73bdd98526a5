//! Local filesystem backend adapter.
//!
//! Stores objects as files under a base directory; object identifiers are
//! treated as relative paths. Intended for the local content-addressed store
//! and for development setups.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use super::BackendAdapter;
use strata_core::{CoreError, CoreResult, ObjectId};

/// Directory-backed [`BackendAdapter`] implementation.
pub struct LocalFsAdapter {
    base_dir: PathBuf,
}

impl LocalFsAdapter {
    /// Creates the adapter, creating the base directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::IoError` if directory creation fails.
    pub async fn new(base_dir: impl AsRef<Path>) -> CoreResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    fn full_path(&self, object_id: &ObjectId) -> PathBuf {
        self.base_dir.join(object_id.as_str())
    }
}

#[async_trait]
impl BackendAdapter for LocalFsAdapter {
    async fn put(&self, object_id: &ObjectId, data: Bytes) -> CoreResult<u64> {
        let path = self.full_path(object_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let size = data.len() as u64;
        tokio::fs::write(&path, &data).await?;
        Ok(size)
    }

    async fn get(&self, object_id: &ObjectId) -> CoreResult<Bytes> {
        let path = self.full_path(object_id);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::not_found("object", object_id.as_str()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, object_id: &ObjectId) -> CoreResult<()> {
        let path = self.full_path(object_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn stat(&self, object_id: &ObjectId) -> CoreResult<Option<u64>> {
        let path = self.full_path(object_id);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_stat() {
        let dir = TempDir::new().unwrap();
        let adapter = LocalFsAdapter::new(dir.path()).await.unwrap();
        let id = ObjectId::new("blobs/abc123");

        let size = adapter.put(&id, Bytes::from("payload")).await.unwrap();
        assert_eq!(size, 7);
        assert_eq!(adapter.get(&id).await.unwrap(), Bytes::from("payload"));
        assert_eq!(adapter.stat(&id).await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_missing_object() {
        let dir = TempDir::new().unwrap();
        let adapter = LocalFsAdapter::new(dir.path()).await.unwrap();
        let id = ObjectId::new("missing");

        assert!(matches!(
            adapter.get(&id).await.unwrap_err(),
            CoreError::NotFound { .. }
        ));
        assert_eq!(adapter.stat(&id).await.unwrap(), None);
        adapter.delete(&id).await.unwrap();
    }
}
