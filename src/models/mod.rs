//! Core data types of the upload broker.
//!
//! Bucket definitions describe policy, upload types describe the wire
//! protocol, and the temporary-upload record maps to the registry table
//! via `sqlx::FromRow`.

pub mod bucket;
pub mod temp_upload;
pub mod upload;
