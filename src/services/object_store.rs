//! The object-store capability the dispatcher brokers access to.
//!
//! The broker never touches payload bytes; everything it needs from a
//! storage provider fits in this trait. URLs it hands out are
//! single-purpose, scoped to one key, and reject after their TTL — the
//! store enforces that, not the broker.

use async_trait::async_trait;
use chrono::Duration;
use std::io;
use thiserror::Error;

/// Transient failure reaching or using the store. Retryable by the
/// embedding adapter; the dispatcher itself never retries.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("object store unreachable: {0}")]
    Unreachable(String),
    #[error("object store rejected the request: {0}")]
    Rejected(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Everything a signed upload URL is scoped to.
#[derive(Clone, Debug)]
pub struct UploadUrlRequest {
    /// Full object key the URL may write.
    pub key: String,

    /// The only content type the transfer may carry.
    pub content_type: String,

    /// Size cap the store enforces at transfer time, if any.
    pub max_size_bytes: Option<u64>,

    /// Validity window of the URL.
    pub ttl: Duration,

    /// Ask the provider for server-side thumbnail generation.
    pub thumbnails: bool,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Time-boxed URL authorizing one direct upload.
    async fn generate_upload_url(&self, req: &UploadUrlRequest) -> Result<String, ProviderError>;

    /// Time-boxed URL authorizing reads of one object.
    async fn generate_read_url(&self, key: &str, ttl: Duration) -> Result<String, ProviderError>;

    /// Delete an object. An already-absent object is success, not an
    /// error — sweeps retry deletions and must stay idempotent.
    async fn delete_object(&self, key: &str) -> Result<(), ProviderError>;

    /// Stable URL where the object is retrievable without signing.
    fn public_url(&self, key: &str) -> String;

    /// Map one of this store's URLs back to its object key. Returns
    /// `None` for URLs that do not belong to this store.
    fn object_key_from_url(&self, url: &str) -> Option<String>;
}
