//! Registry record for a granted upload that awaits confirmation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// One row in the temporary-upload registry — the only durable state
/// the broker owns.
///
/// The registry exclusively owns these records; no other component
/// mutates them directly.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct TempUpload {
    /// Full object key, also the primary key.
    pub object_key: String,

    /// Bucket the grant was issued against.
    pub bucket_name: String,

    /// Correlation token handed out in the grant.
    pub upload_id: Uuid,

    /// When the grant was issued.
    pub created_at: DateTime<Utc>,

    /// Flipped by the first successful confirm, never back.
    pub confirmed: bool,

    /// True for `temporary` uploads: unconfirmed past the reclamation
    /// window, the reaper deletes the object. False for records that
    /// exist only to track a pending replacement.
    pub is_temporary: bool,

    /// Key of the object to delete once this upload is confirmed.
    pub replace_key: Option<String>,

    /// JSON snapshot of the caller context at grant time.
    pub uploader_context: Option<String>,
}
