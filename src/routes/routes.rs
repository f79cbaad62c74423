//! Route table for the broker API and the dev store.
//!
//! ## Structure
//! - **Broker endpoints** (framework adapter over the dispatcher)
//!   - `POST   /api/buckets/{bucket}/uploads`          — request an upload grant
//!   - `POST   /api/buckets/{bucket}/uploads/confirm`  — confirm a granted upload
//!   - `GET    /api/buckets/{bucket}/access/{*key}`    — request a read URL
//!   - `DELETE /api/buckets/{bucket}/files/{*key}`     — delete an object
//!
//! - **Dev store endpoints** (targets of the signed URLs)
//!   - `PUT    /o/{*key}` — direct upload, signature-checked
//!   - `GET    /o/{*key}` — direct read, signature-checked
//!
//! The wildcard `*key` allows nested keys like `images/2025/logo.png`.

use crate::handlers::{
    AppState,
    broker_handlers::{confirm_upload, delete_file, request_access, request_upload},
    health_handlers::{healthz, readyz},
    store_handlers::{get_object, put_object},
};
use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// Build and return the router for all broker and dev-store routes.
///
/// The router carries shared state ([`AppState`]) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // broker endpoints
        .route("/api/buckets/{bucket}/uploads", post(request_upload))
        .route("/api/buckets/{bucket}/uploads/confirm", post(confirm_upload))
        .route("/api/buckets/{bucket}/access/{*key}", get(request_access))
        .route("/api/buckets/{bucket}/files/{*key}", delete(delete_file))
        // dev store endpoints
        .route("/o/{*key}", put(put_object).get(get_object))
}
