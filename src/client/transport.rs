//! The direct-transfer seam: moving bytes to a signed URL.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use reqwest::header;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Cumulative bytes sent, reported as the transfer progresses.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Network-level failure. The signed URL may still be valid, so the
    /// orchestrator retries the same transfer.
    #[error("transfer failed: {0}")]
    Network(String),
    /// Storage refused the transfer (expired URL, size cap, ...).
    /// Retrying the same URL cannot succeed.
    #[error("storage rejected the transfer: status {0}")]
    Rejected(u16),
    /// The caller aborted. A distinct outcome, not a failure.
    #[error("transfer aborted")]
    Cancelled,
}

impl TransferError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Network(_))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// PUT `data` to the signed URL, reporting cumulative progress and
    /// aborting the in-flight request when `cancel` fires — not merely
    /// ceasing to await it.
    async fn put(
        &self,
        url: &str,
        content_type: &str,
        data: Bytes,
        on_progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<(), TransferError>;
}

const CHUNK_SIZE: usize = 64 * 1024;

/// Streams the payload over HTTP in fixed-size chunks so progress can
/// be observed on large bodies.
#[derive(Clone, Debug, Default)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn put(
        &self,
        url: &str,
        content_type: &str,
        data: Bytes,
        on_progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<(), TransferError> {
        let total = data.len() as u64;
        let chunks: Vec<Bytes> = (0..data.len())
            .step_by(CHUNK_SIZE)
            .map(|start| data.slice(start..data.len().min(start + CHUNK_SIZE)))
            .collect();

        let sent = Arc::new(AtomicU64::new(0));
        let counting = stream::iter(chunks).map(move |chunk| {
            let so_far = sent.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
            on_progress(so_far);
            Ok::<_, io::Error>(chunk)
        });

        let request = self
            .http
            .put(url)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(counting))
            .send();

        // Dropping the request future tears the connection down, so an
        // abort stops the transfer itself, not just our wait on it.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            result = request => match result {
                Ok(resp) if resp.status().is_success() => Ok(()),
                Ok(resp) => Err(TransferError::Rejected(resp.status().as_u16())),
                Err(err) => Err(TransferError::Network(err.to_string())),
            },
        }
    }
}
