//! Concrete [`reportflow::storage::StorageBackend`] implementations: an
//! S3-compatible primary and a local filesystem fallback.
//!
//! Wire these into a [`reportflow::storage::HybridStorage`]:
//!
//! ```ignore
//! let primary = S3Storage::new("reports-bucket").await?;
//! let fallback = FilesystemStorage::new("/var/lib/reportflow/artifacts")?;
//! let storage = HybridStorage::new(Some(Box::new(primary)), Box::new(fallback));
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use reportflow::storage::{BackendError, StorageBackend};
use tracing::{debug, warn};

/// Object storage on Amazon S3 or an S3-compatible endpoint (`MinIO`, etc).
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    /// Build a client from the ambient AWS environment (env vars, shared
    /// config, IMDS credentials) and target `bucket`.
    pub async fn new(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        let client = Client::new(&config);
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build from a pre-constructed client, for pointing at `LocalStack` or a
    /// custom endpoint in tests.
    #[must_use]
    pub fn with_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<u64, BackendError> {
        let size = bytes.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                warn!(key, error = %e, "s3 put_object failed");
                BackendError::Unreachable(e.to_string())
            })?;
        debug!(key, size, "uploaded object to s3");
        Ok(size)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    BackendError::NotFound(key.to_string())
                } else {
                    BackendError::Unreachable(e.to_string())
                }
            })?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| BackendError::Io(e.to_string()))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String, BackendError> {
        let config = PresigningConfig::expires_in(ttl).map_err(|e| BackendError::Io(e.to_string()))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;
        Ok(presigned.uri().to_string())
    }
}

/// Object storage on the local filesystem, writing atomically via a
/// temp-file-then-rename so a reader never observes a partial write.
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    /// Create (or reuse) a storage root directory.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl StorageBackend for FilesystemStorage {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<u64, BackendError> {
        let path = self.path_for_key(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BackendError::Io(e.to_string()))?;
        }

        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, bytes)
            .await
            .map_err(|e| BackendError::Io(e.to_string()))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| BackendError::Io(e.to_string()))?;

        Ok(bytes.len() as u64)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        let path = self.path_for_key(key);
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackendError::NotFound(key.to_string())
            } else {
                BackendError::Io(e.to_string())
            }
        })
    }

    async fn presigned_url(&self, key: &str, _ttl: Duration) -> Result<String, BackendError> {
        Ok(format!("file://{}", self.path_for_key(key).display()))
    }
}
