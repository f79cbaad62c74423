//! The upload orchestrator: one state machine per upload attempt.
//!
//! `Idle → RequestingGrant → Transferring → Confirming? → Done |
//! Aborted | Failed`. The caller gets a handle holding a cancellation
//! token and a finite event stream: zero or more monotone `Progress`
//! events, then exactly one terminal event, then nothing.

use crate::client::api::{GrantApi, GrantError};
use crate::client::transport::{TransferError, Transport};
use crate::models::upload::{UploadMetadata, UploadOptions, UploadRef};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A local file staged for upload.
#[derive(Clone, Debug)]
pub struct UploadInput {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl UploadInput {
    fn metadata(&self) -> UploadMetadata {
        UploadMetadata {
            file_name: self.file_name.clone(),
            content_type: self.content_type.clone(),
            size_bytes: self.data.len() as u64,
        }
    }
}

/// The finished upload as reported to the caller.
#[derive(Clone, Debug)]
pub struct UploadedFile {
    pub bucket: String,
    pub object_key: String,
    /// Stable URL where the object is retrievable.
    pub url: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    /// False when confirmation failed: the object exists but automatic
    /// cleanup will eventually remove it.
    pub confirmed: bool,
}

#[derive(Debug, Error)]
pub enum UploadError {
    /// This handle already has an active upload.
    #[error("an upload is already in progress on this handle")]
    Busy,

    /// The grant request failed terminally, or exhausted its retries.
    #[error(transparent)]
    Grant(#[from] GrantError),

    /// The transfer failed after bounded retries of the same signed URL.
    #[error("transfer failed after {attempts} attempts: {reason}")]
    Transfer { attempts: u32, reason: String },

    /// The bytes are uploaded but the confirm call failed: the object
    /// is present yet unconfirmed, and the reaper will reclaim it.
    #[error("object uploaded but confirmation failed: {reason}")]
    ConfirmFailed { file: UploadedFile, reason: String },
}

/// Events on the handle's stream. `Progress` percentages are monotone
/// non-decreasing in `[0, 100]` and rate-bounded (one event per integer
/// step at most).
#[derive(Debug)]
pub enum UploadEvent {
    Progress(u8),
    Completed(UploadedFile),
    Aborted,
    Failed(UploadError),
}

impl UploadEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadEvent::Progress(_))
    }
}

/// Handle to one running upload.
#[derive(Debug)]
pub struct UploadHandle {
    events: mpsc::Receiver<UploadEvent>,
    cancel: CancellationToken,
}

impl UploadHandle {
    /// Abort the upload. The in-flight transfer is torn down and the
    /// stream ends with a single `Aborted` event.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next event, or `None` once the stream is finished.
    pub async fn next_event(&mut self) -> Option<UploadEvent> {
        self.events.recv().await
    }

    /// Drain the stream and return the terminal event.
    pub async fn wait(mut self) -> Option<UploadEvent> {
        let mut last = None;
        while let Some(event) = self.events.recv().await {
            if event.is_terminal() {
                last = Some(event);
            }
        }
        last
    }
}

/// Spawns and supervises uploads. At most one active upload per
/// uploader; starting another before the previous reaches a terminal
/// state is an error.
#[derive(Debug)]
pub struct Uploader<A, T> {
    api: Arc<A>,
    transport: Arc<T>,
    active: Arc<AtomicBool>,
    grant_attempts: u32,
    transfer_attempts: u32,
    retry_delay: Duration,
}

impl<A, T> Uploader<A, T>
where
    A: GrantApi + 'static,
    T: Transport + 'static,
{
    pub fn new(api: A, transport: T) -> Self {
        Self {
            api: Arc::new(api),
            transport: Arc::new(transport),
            active: Arc::new(AtomicBool::new(false)),
            grant_attempts: 3,
            transfer_attempts: 3,
            retry_delay: Duration::from_millis(250),
        }
    }

    /// Base delay between retry attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Start an upload. Returns immediately with the handle; the state
    /// machine runs in a background task.
    pub fn upload(
        &self,
        bucket: impl Into<String>,
        input: UploadInput,
        options: UploadOptions,
    ) -> Result<UploadHandle, UploadError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(UploadError::Busy);
        }

        let (tx, rx) = mpsc::channel(128);
        let cancel = CancellationToken::new();
        let run = Run {
            api: Arc::clone(&self.api),
            transport: Arc::clone(&self.transport),
            grant_attempts: self.grant_attempts,
            transfer_attempts: self.transfer_attempts,
            retry_delay: self.retry_delay,
            _guard: ActiveGuard(Arc::clone(&self.active)),
        };
        tokio::spawn(run.drive(bucket.into(), input, options, tx, cancel.clone()));

        Ok(UploadHandle { events: rx, cancel })
    }
}

/// Clears the uploader's active flag when the task ends, however it
/// ends.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Run<A, T> {
    api: Arc<A>,
    transport: Arc<T>,
    grant_attempts: u32,
    transfer_attempts: u32,
    retry_delay: Duration,
    _guard: ActiveGuard,
}

impl<A, T> Run<A, T>
where
    A: GrantApi,
    T: Transport,
{
    async fn drive(
        self,
        bucket: String,
        input: UploadInput,
        options: UploadOptions,
        tx: mpsc::Sender<UploadEvent>,
        cancel: CancellationToken,
    ) {
        let meta = input.metadata();

        // --- RequestingGrant ---
        let mut attempt = 0;
        let grant = loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = tx.send(UploadEvent::Aborted).await;
                    return;
                }
                result = self.api.request_upload(&bucket, &meta, &options) => result,
            };
            match result {
                Ok(grant) => break grant,
                Err(err) if err.is_retryable() && attempt < self.grant_attempts => {
                    if self.backoff(attempt, &cancel, &tx).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    let _ = tx.send(UploadEvent::Failed(UploadError::Grant(err))).await;
                    return;
                }
            }
        };

        // --- Transferring ---
        let total = input.data.len() as u64;
        let last_pct = Arc::new(AtomicU8::new(0));
        let on_progress = {
            let tx = tx.clone();
            let last_pct = Arc::clone(&last_pct);
            Arc::new(move |sent: u64| {
                let pct = if total == 0 {
                    100
                } else {
                    ((sent.min(total) * 100) / total) as u8
                };
                // One event per integer step keeps the rate bounded and
                // the sequence monotone, including across retries.
                if pct > last_pct.fetch_max(pct, Ordering::SeqCst) {
                    let _ = tx.try_send(UploadEvent::Progress(pct));
                }
            })
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .transport
                .put(
                    &grant.signed_url,
                    &meta.content_type,
                    input.data.clone(),
                    on_progress.clone(),
                    cancel.clone(),
                )
                .await
            {
                Ok(()) => break,
                Err(TransferError::Cancelled) => {
                    let _ = tx.send(UploadEvent::Aborted).await;
                    return;
                }
                Err(err) if err.is_retryable() && attempt < self.transfer_attempts => {
                    // The signed URL may still be valid; retry the same
                    // transfer rather than requesting a new grant.
                    if self.backoff(attempt, &cancel, &tx).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    let _ = tx
                        .send(UploadEvent::Failed(UploadError::Transfer {
                            attempts: attempt,
                            reason: err.to_string(),
                        }))
                        .await;
                    return;
                }
            }
        }

        if last_pct.fetch_max(100, Ordering::SeqCst) < 100 {
            let _ = tx.send(UploadEvent::Progress(100)).await;
        }

        let mut file = UploadedFile {
            bucket: grant.bucket.clone(),
            object_key: grant.object_key.clone(),
            url: grant.public_url.clone(),
            size: total,
            uploaded_at: Utc::now(),
            confirmed: false,
        };

        // --- Confirming ---
        if grant.confirm_required {
            let reference = UploadRef::Id(grant.upload_id);
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.api.confirm_upload(&bucket, &reference).await {
                    Ok(()) => {
                        file.confirmed = true;
                        break;
                    }
                    Err(err) if err.is_retryable() && attempt < self.grant_attempts => {
                        if self.backoff(attempt, &cancel, &tx).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = tx
                            .send(UploadEvent::Failed(UploadError::ConfirmFailed {
                                reason: err.to_string(),
                                file,
                            }))
                            .await;
                        return;
                    }
                }
            }
        }

        let _ = tx.send(UploadEvent::Completed(file)).await;
    }

    /// Linear backoff that stays responsive to cancellation. `Err` means
    /// the upload was aborted and its terminal event already sent.
    async fn backoff(
        &self,
        attempt: u32,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<UploadEvent>,
    ) -> Result<(), ()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = tx.send(UploadEvent::Aborted).await;
                Err(())
            }
            _ = tokio::time::sleep(self.retry_delay * attempt) => Ok(()),
        }
    }
}
