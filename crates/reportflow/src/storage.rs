//! Hybrid primary/fallback object storage (§4.11).
//!
//! Concrete backends (`S3Storage`, `FilesystemStorage`) live in
//! `reportflow-storage`, grounded in the teacher's `dashflow-registry::storage`
//! `StorageBackend` trait and its `FilesystemStorage`'s atomic
//! write-to-temp-then-rename pattern. This module owns only the failover
//! policy shared by whichever two backends are wired in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

/// Errors a single [`StorageBackend`] may return.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("storage I/O error: {0}")]
    Io(String),
    #[error("backend unreachable: {0}")]
    Unreachable(String),
}

/// Which backend produced a [`PutOutcome`] or should be tried first for a `get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Primary,
    Fallback,
}

/// Result of a successful [`HybridStorage::put`].
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub key: String,
    pub size: u64,
    pub backend: Backend,
}

/// Result of a successful [`HybridStorage::get`].
#[derive(Debug, Clone)]
pub struct GetOutcome {
    pub bytes: Vec<u8>,
    pub backend: Backend,
}

/// One object storage backend. Both the S3-compatible primary and the local
/// filesystem fallback implement this.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<u64, BackendError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError>;
    async fn presigned_url(&self, key: &str, ttl: std::time::Duration) -> Result<String, BackendError>;
}

/// Orchestrates a primary backend with an always-available local fallback,
/// transparently failing over on primary error (§4.11).
pub struct HybridStorage {
    primary: Option<Box<dyn StorageBackend>>,
    fallback: Box<dyn StorageBackend>,
}

impl HybridStorage {
    /// Construct with an optional primary; `primary=None` means every
    /// operation goes straight to `fallback` (matches `STORAGE_PRIMARY_ENABLED=false`).
    #[must_use]
    pub fn new(primary: Option<Box<dyn StorageBackend>>, fallback: Box<dyn StorageBackend>) -> Self {
        Self { primary, fallback }
    }

    /// Write `bytes` under `key`. Tries primary first; on any primary error,
    /// falls back and reports `backend=fallback`. Fails only if both backends
    /// error.
    pub async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<PutOutcome, crate::error::Error> {
        if let Some(primary) = &self.primary {
            match primary.put(key, bytes, content_type).await {
                Ok(size) => {
                    return Ok(PutOutcome {
                        key: key.to_string(),
                        size,
                        backend: Backend::Primary,
                    })
                }
                Err(e) => {
                    warn!(key, error = %e, "primary storage put failed, falling back");
                }
            }
        }

        match self.fallback.put(key, bytes, content_type).await {
            Ok(size) => Ok(PutOutcome {
                key: key.to_string(),
                size,
                backend: Backend::Fallback,
            }),
            Err(e) => {
                error!(key, error = %e, "fallback storage put also failed");
                Err(crate::error::Error::Storage {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Read `key`, trying `preferred` first (the backend an artifact was
    /// recorded under), then the other.
    pub async fn get(&self, key: &str, preferred: Backend) -> Result<GetOutcome, crate::error::Error> {
        let order: [Backend; 2] = match preferred {
            Backend::Primary => [Backend::Primary, Backend::Fallback],
            Backend::Fallback => [Backend::Fallback, Backend::Primary],
        };

        let mut last_error: Option<BackendError> = None;
        for backend in order {
            let result = match backend {
                Backend::Primary => match &self.primary {
                    Some(primary) => primary.get(key).await,
                    None => continue,
                },
                Backend::Fallback => self.fallback.get(key).await,
            };
            match result {
                Ok(bytes) => return Ok(GetOutcome { bytes, backend }),
                Err(e) => last_error = Some(e),
            }
        }

        match last_error {
            Some(BackendError::NotFound(_)) | None => {
                Err(crate::error::Error::StorageNotFound(key.to_string()))
            }
            Some(e) => Err(crate::error::Error::Storage {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Primary-only presigned URL; falls back to the fallback backend's own
    /// (locally served) URL contract when no primary is configured or it errors.
    pub async fn presigned_url(
        &self,
        key: &str,
        ttl: std::time::Duration,
    ) -> Result<String, crate::error::Error> {
        if let Some(primary) = &self.primary {
            if let Ok(url) = primary.presigned_url(key, ttl).await {
                return Ok(url);
            }
        }
        self.fallback
            .presigned_url(key, ttl)
            .await
            .map_err(|e| crate::error::Error::Storage {
                key: key.to_string(),
                message: e.to_string(),
            })
    }
}
