//! The broker API as seen from the client side.
//!
//! [`GrantApi`] is the seam the orchestrator drives; the HTTP
//! implementation talks to the broker routes, and tests substitute a
//! scripted fake. The error split mirrors the server taxonomy so the
//! orchestrator can tell retryable from terminal without string
//! matching.

use crate::models::upload::{
    ConfirmRequestBody, UploadGrant, UploadMetadata, UploadOptions, UploadRef, UploadRequestBody,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GrantError {
    /// The client must fix the call; retrying unchanged cannot succeed.
    #[error("{0}")]
    Validation(String),
    /// Denied by a bucket hook. Non-retryable without a context change.
    #[error("{0}")]
    Denied(String),
    /// Unknown bucket or record.
    #[error("{0}")]
    NotFound(String),
    /// Transient broker or store failure; retryable with backoff.
    #[error("{0}")]
    Provider(String),
}

impl GrantError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GrantError::Provider(_))
    }
}

#[async_trait]
pub trait GrantApi: Send + Sync {
    async fn request_upload(
        &self,
        bucket: &str,
        meta: &UploadMetadata,
        options: &UploadOptions,
    ) -> Result<UploadGrant, GrantError>;

    async fn confirm_upload(&self, bucket: &str, reference: &UploadRef)
    -> Result<(), GrantError>;
}

/// Talks to a broker over HTTP.
#[derive(Clone, Debug)]
pub struct HttpGrantApi {
    base_url: String,
    http: reqwest::Client,
}

impl HttpGrantApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Map an error response onto the taxonomy, preferring the `kind`
    /// field over the transport status.
    async fn to_error(resp: reqwest::Response) -> GrantError {
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        let message = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("request failed")
            .to_string();
        match body.get("kind").and_then(|v| v.as_str()) {
            Some("validation") => GrantError::Validation(message),
            Some("authorization") => GrantError::Denied(message),
            Some("not_found") => GrantError::NotFound(message),
            Some(_) | None => match status.as_u16() {
                400 => GrantError::Validation(message),
                403 => GrantError::Denied(message),
                404 => GrantError::NotFound(message),
                _ => GrantError::Provider(message),
            },
        }
    }
}

#[async_trait]
impl GrantApi for HttpGrantApi {
    async fn request_upload(
        &self,
        bucket: &str,
        meta: &UploadMetadata,
        options: &UploadOptions,
    ) -> Result<UploadGrant, GrantError> {
        let url = format!("{}/api/buckets/{}/uploads", self.base_url, bucket);
        let body = UploadRequestBody {
            metadata: meta.clone(),
            options: options.clone(),
        };
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| GrantError::Provider(err.to_string()))?;
        if resp.status().is_success() {
            resp.json::<UploadGrant>()
                .await
                .map_err(|err| GrantError::Provider(format!("malformed grant response: {err}")))
        } else {
            Err(Self::to_error(resp).await)
        }
    }

    async fn confirm_upload(
        &self,
        bucket: &str,
        reference: &UploadRef,
    ) -> Result<(), GrantError> {
        let url = format!("{}/api/buckets/{}/uploads/confirm", self.base_url, bucket);
        let body = match reference {
            UploadRef::Id(id) => ConfirmRequestBody {
                upload_id: Some(*id),
                ..Default::default()
            },
            UploadRef::Key(key) => ConfirmRequestBody {
                object_key: Some(key.clone()),
                ..Default::default()
            },
        };
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| GrantError::Provider(err.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::to_error(resp).await)
        }
    }
}
