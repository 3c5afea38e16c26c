//! Content-addressed blob storage for file bytes.
//!
//! Blobs are stored on the filesystem under their SHA-256 checksum, fanned
//! out by the first two hex characters. Identical content is stored once.
//! Only metadata lives in the database.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::StorageError;
use crate::catalog::compute_checksum;

/// Filesystem store for content bytes.
#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
}

impl BlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Stores `data` and returns its checksum.
    ///
    /// The write goes to a temporary name first so a reader never sees a
    /// partial blob.
    pub async fn put(&self, data: &[u8]) -> Result<String, StorageError> {
        let checksum = compute_checksum(data);
        let file_path = self.blob_path(&checksum);

        if fs::try_exists(&file_path).await? {
            return Ok(checksum);
        }

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::DirectoryCreationFailed(format!("{}: {}", parent.display(), e))
            })?;
        }

        let tmp_path = file_path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &file_path).await?;

        Ok(checksum)
    }

    /// Reads a blob back, verifying its checksum.
    pub async fn get(&self, checksum: &str) -> Result<Vec<u8>, StorageError> {
        let file_path = self.blob_path(checksum);
        let data = fs::read(&file_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::BlobNotFound(checksum.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        let actual = compute_checksum(&data);
        if actual != checksum {
            return Err(StorageError::ChecksumMismatch {
                expected: checksum.to_string(),
                actual,
            });
        }

        Ok(data)
    }

    pub async fn contains(&self, checksum: &str) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.blob_path(checksum)).await?)
    }

    /// Uses the first 2 characters of the checksum as a subdirectory
    /// to avoid having too many files in a single directory.
    fn blob_path(&self, checksum: &str) -> PathBuf {
        let subdir = &checksum[0..2.min(checksum.len())];
        self.base_path.join(subdir).join(checksum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_and_get() {
        let dir = TempDir::new().expect("tempdir");
        let store = BlobStore::new(dir.path());

        let checksum = store.put(b"point cloud").await.expect("put");
        assert_eq!(checksum.len(), 64);
        assert!(dir.path().join(&checksum[..2]).join(&checksum).is_file());

        let data = store.get(&checksum).await.expect("get");
        assert_eq!(data, b"point cloud");
    }

    #[tokio::test]
    async fn test_identical_content_stored_once() {
        let dir = TempDir::new().expect("tempdir");
        let store = BlobStore::new(dir.path());

        let first = store.put(b"same").await.expect("put");
        let second = store.put(b"same").await.expect("put");
        assert_eq!(first, second);

        let fanout = dir.path().join(&first[..2]);
        let entries = std::fs::read_dir(fanout).expect("read dir").count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_corrupt_blob_detected() {
        let dir = TempDir::new().expect("tempdir");
        let store = BlobStore::new(dir.path());

        let checksum = store.put(b"original").await.expect("put");
        std::fs::write(dir.path().join(&checksum[..2]).join(&checksum), b"tampered")
            .expect("tamper");

        let err = store.get(&checksum).await.unwrap_err();
        assert!(matches!(err, StorageError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let dir = TempDir::new().expect("tempdir");
        let store = BlobStore::new(dir.path());

        let checksum = compute_checksum(b"never stored");
        assert!(!store.contains(&checksum).await.expect("contains"));
        let err = store.get(&checksum).await.unwrap_err();
        assert!(matches!(err, StorageError::BlobNotFound(_)));
    }
}
