//! HTTP handlers: the broker adapter, the dev store's signed endpoints,
//! and health probes.

pub mod broker_handlers;
pub mod health_handlers;
pub mod store_handlers;

use crate::services::{dispatcher::Dispatcher, local_store::LocalObjectStore};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher<serde_json::Value>>,
    pub store: Arc<LocalObjectStore>,
    pub db: Arc<SqlitePool>,
}

/// Caller context as installed by the embedding application's
/// authentication middleware. The broker passes it through to bucket
/// hooks without looking inside.
#[derive(Clone, Debug)]
pub struct CallerContext(pub serde_json::Value);
