use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Bucket holding uploaded audio.
pub const SONGS_BUCKET: &str = "songs";

const METADATA_DIR: &str = ".meta";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub content_type: String,
    pub size: u64,
}

pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Storage for opaque binary objects addressed by key within one bucket.
///
/// Writes are create-only: putting a key that already exists fails with
/// [`StorageError::AlreadyExists`] and leaves the existing object untouched.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn put(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<ObjectInfo, StorageError>;

    async fn head(&self, key: &str) -> Result<ObjectInfo, StorageError>;

    /// Open a reader over `len` bytes starting at `start`.
    async fn read(&self, key: &str, start: u64, len: u64) -> Result<ObjectReader, StorageError>;
}

/// Accept only flat keys made of `[A-Za-z0-9._-]` that do not start with a dot.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Object store backed by a directory per bucket. Content types are kept in
/// JSON sidecars under `.meta/`, which no valid key can reach.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    bucket: String,
    root: PathBuf,
}

impl LocalObjectStore {
    pub async fn new(data_dir: &Path, bucket: &str) -> Result<Self> {
        let root = data_dir.join(bucket);
        tokio::fs::create_dir_all(root.join(METADATA_DIR))
            .await
            .with_context(|| format!("Failed to create bucket directory: {}", root.display()))?;

        tracing::info!("Object storage bucket '{}' at {}", bucket, root.display());

        Ok(Self {
            bucket: bucket.to_string(),
            root,
        })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.root.join(METADATA_DIR).join(format!("{}.json", key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<ObjectInfo, StorageError> {
        let path = self.object_path(key)?;

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let info = ObjectInfo {
            content_type: content_type.to_string(),
            size: data.len() as u64,
        };

        let written = async {
            file.write_all(data).await?;
            file.flush().await?;
            let sidecar = serde_json::to_vec(&info)?;
            tokio::fs::write(self.metadata_path(key), sidecar).await?;
            Ok::<_, StorageError>(())
        }
        .await;

        if let Err(e) = written {
            // Drop the partial object so the key is free again.
            let _ = tokio::fs::remove_file(&path).await;
            let _ = tokio::fs::remove_file(self.metadata_path(key)).await;
            return Err(e);
        }

        tracing::debug!("Stored {}/{} ({} bytes)", self.bucket, key, info.size);
        Ok(info)
    }

    async fn head(&self, key: &str) -> Result<ObjectInfo, StorageError> {
        let path = self.object_path(key)?;

        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let content_type = match tokio::fs::read(self.metadata_path(key)).await {
            Ok(bytes) => serde_json::from_slice::<ObjectInfo>(&bytes)?.content_type,
            Err(_) => "application/octet-stream".to_string(),
        };

        Ok(ObjectInfo { content_type, size })
    }

    async fn read(&self, key: &str, start: u64, len: u64) -> Result<ObjectReader, StorageError> {
        let path = self.object_path(key)?;

        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        file.seek(std::io::SeekFrom::Start(start)).await?;
        Ok(Box::new(file.take(len)))
    }
}
