//! Axum adapter over the dispatcher's call contract.
//!
//! Each handler translates the native request into an
//! [`AdapterRequest`] and the dispatcher's response back into HTTP.
//! No authorization or validation happens here — that is the
//! dispatcher's pipeline.

use crate::handlers::{AppState, CallerContext};
use crate::models::upload::{AdapterRequest, Operation};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

fn context(ctx: Option<Extension<CallerContext>>) -> Value {
    ctx.map(|Extension(CallerContext(value))| value)
        .unwrap_or(Value::Null)
}

async fn dispatch(state: &AppState, req: AdapterRequest<Value>) -> Response {
    let resp = state.dispatcher.handle(req).await;
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(resp.body)).into_response()
}

/// `POST /api/buckets/{bucket}/uploads`
pub async fn request_upload(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    ctx: Option<Extension<CallerContext>>,
    Json(body): Json<Value>,
) -> Response {
    dispatch(
        &state,
        AdapterRequest {
            bucket,
            operation: Operation::RequestUpload,
            body,
            context: context(ctx),
        },
    )
    .await
}

/// `POST /api/buckets/{bucket}/uploads/confirm`
pub async fn confirm_upload(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    ctx: Option<Extension<CallerContext>>,
    Json(body): Json<Value>,
) -> Response {
    dispatch(
        &state,
        AdapterRequest {
            bucket,
            operation: Operation::ConfirmUpload,
            body,
            context: context(ctx),
        },
    )
    .await
}

/// `GET /api/buckets/{bucket}/access/{*key}`
pub async fn request_access(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    ctx: Option<Extension<CallerContext>>,
) -> Response {
    dispatch(
        &state,
        AdapterRequest {
            bucket,
            operation: Operation::RequestAccess,
            body: json!({ "object_key": key }),
            context: context(ctx),
        },
    )
    .await
}

/// `DELETE /api/buckets/{bucket}/files/{*key}`
pub async fn delete_file(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    ctx: Option<Extension<CallerContext>>,
) -> Response {
    dispatch(
        &state,
        AdapterRequest {
            bucket,
            operation: Operation::DeleteFile,
            body: json!({ "object_key": key }),
            context: context(ctx),
        },
    )
    .await
}
