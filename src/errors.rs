//! Error taxonomy of the dispatcher and its HTTP mapping.
//!
//! Every failure mode surfaces a distinguishable kind so framework
//! adapters can map it to a transport status without inspecting
//! messages. The dispatcher never swallows errors and never retries;
//! only `Provider` failures are transient.

use crate::services::object_store::ProviderError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The named bucket is not in the router. Non-retryable.
    #[error("bucket `{0}` is not registered")]
    UnknownBucket(String),

    /// No registry record matches the reference — never granted,
    /// already reaped, or deleted. Terminal for the caller.
    #[error("no upload record matches `{0}`")]
    RecordNotFound(String),

    /// Bad size, content type, or malformed input. The client must fix
    /// the call; retrying unchanged cannot succeed.
    #[error("{0}")]
    Validation(String),

    /// A bucket hook denied the operation.
    #[error("{0}")]
    Denied(String),

    /// The object store failed transiently. The embedding adapter may
    /// retry at its discretion.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Registry storage failure.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::UnknownBucket(_) | DispatchError::RecordNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
            DispatchError::Denied(_) => StatusCode::FORBIDDEN,
            DispatchError::Provider(_) => StatusCode::BAD_GATEWAY,
            DispatchError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind, carried in every error response.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::UnknownBucket(_) | DispatchError::RecordNotFound(_) => "not_found",
            DispatchError::Validation(_) => "validation",
            DispatchError::Denied(_) => "authorization",
            DispatchError::Provider(_) => "provider",
            DispatchError::Database(_) => "internal",
        }
    }

    /// JSON body used by both the adapter contract and the HTTP layer.
    pub fn to_body(&self) -> serde_json::Value {
        json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "status": self.status().as_u16(),
        })
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_body())).into_response()
    }
}
