//! Broker for direct client-to-storage uploads.
//!
//! The broker issues short-lived, capability-scoped signed URLs so
//! payload bytes travel straight from clients to object storage while
//! the application keeps authorization, validation, and lifecycle
//! bookkeeping. Buckets are registered once at startup with their
//! policy; the dispatcher runs every request through that policy before
//! a URL is minted; a registry plus reaper reclaims temporary uploads
//! that are never confirmed.
//!
//! The embedding application supplies the bucket table and an opaque
//! caller context; the bundled axum routes and dev object store make
//! the binary a complete local setup.

pub mod client;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod router;
pub mod routes;
pub mod services;

pub use errors::DispatchError;
pub use models::bucket::{AuthorizationHook, BucketDefinition, BucketKind, Decision, HookTarget};
pub use models::upload::{
    AccessUrl, AdapterRequest, AdapterResponse, ConfirmOutcome, Operation, UploadGrant,
    UploadMetadata, UploadOptions, UploadRef,
};
pub use router::{BucketRouter, DuplicateBucket, RouterBuilder};
pub use services::dispatcher::Dispatcher;
pub use services::object_store::{ObjectStore, ProviderError, UploadUrlRequest};
pub use services::reaper::Reaper;
pub use services::registry::TempFileRegistry;
