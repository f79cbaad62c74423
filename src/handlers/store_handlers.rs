//! Signed PUT/GET endpoints of the dev object store.
//!
//! These are the URLs [`crate::services::local_store::LocalObjectStore`]
//! mints. Bodies stream both ways; nothing is buffered in memory.

use crate::handlers::AppState;
use crate::services::{local_store::StoreWriteError, signing::SignatureError};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::io;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub expires: i64,
    #[serde(rename = "content-type")]
    pub content_type: String,
    #[serde(rename = "max-size")]
    pub max_size: Option<u64>,
    pub sig: String,
}

#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    pub expires: Option<i64>,
    pub sig: Option<String>,
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn signature_response(err: SignatureError) -> Response {
    match err {
        SignatureError::Expired => reject(StatusCode::FORBIDDEN, "signed url has expired"),
        SignatureError::Mismatch | SignatureError::Malformed => {
            reject(StatusCode::FORBIDDEN, "signature rejected")
        }
    }
}

/// `PUT /o/{*key}` — accept one direct upload, exactly as signed.
pub async fn put_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if let Err(err) =
        state
            .store
            .verify_upload_url(&key, &q.content_type, q.max_size, q.expires, &q.sig)
    {
        return signature_response(err);
    }

    // The URL is scoped to one content type; the transfer must carry it.
    let sent_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if sent_type != q.content_type {
        return reject(
            StatusCode::BAD_REQUEST,
            "content type does not match the signed url",
        );
    }

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    match state.store.put_object(&key, q.max_size, stream).await {
        Ok(size) => (StatusCode::OK, Json(json!({ "key": key, "size": size }))).into_response(),
        Err(StoreWriteError::TooLarge { limit }) => reject(
            StatusCode::PAYLOAD_TOO_LARGE,
            &format!("payload exceeds the {limit} byte cap of the signed url"),
        ),
        Err(StoreWriteError::InvalidKey) => reject(StatusCode::BAD_REQUEST, "invalid object key"),
        Err(StoreWriteError::Io(err)) => {
            tracing::error!(key = %key, error = %err, "object write failed");
            reject(StatusCode::INTERNAL_SERVER_ERROR, "object write failed")
        }
    }
}

/// `GET /o/{*key}` — stream an object back. Signed unless the store was
/// built for public dev serving.
pub async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<ReadQuery>,
) -> Response {
    match (q.expires, q.sig) {
        (Some(expires), Some(sig)) => {
            if let Err(err) = state.store.verify_read_url(&key, expires, &sig) {
                return signature_response(err);
            }
        }
        _ if state.store.unsigned_reads_allowed() => {}
        _ => return reject(StatusCode::FORBIDDEN, "a signed url is required"),
    }

    match state.store.open_object(&key).await {
        Ok(Some((file, len))) => {
            let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
                headers.insert(header::CONTENT_LENGTH, value);
            }
            response
        }
        Ok(None) => reject(StatusCode::NOT_FOUND, "no such object"),
        Err(StoreWriteError::InvalidKey) => reject(StatusCode::BAD_REQUEST, "invalid object key"),
        Err(err) => {
            tracing::error!(key = %key, error = %err, "object read failed");
            reject(StatusCode::INTERNAL_SERVER_ERROR, "object read failed")
        }
    }
}
