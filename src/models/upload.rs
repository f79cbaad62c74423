//! Request and grant types for the upload protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Client-declared facts about the file to be uploaded.
///
/// The broker validates these against the bucket's policy before any
/// signed URL is issued. The declared size is also baked into the signed
/// URL so the store can enforce it at transfer time.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadMetadata {
    /// File name as the client knows it (e.g. `report.pdf`).
    pub file_name: String,

    /// MIME type the client will send the bytes with.
    pub content_type: String,

    /// Declared payload size in bytes.
    pub size_bytes: u64,
}

impl UploadMetadata {
    /// Copy of this metadata with the file name swapped out.
    pub fn with_file_name(&self, name: &str) -> Self {
        Self {
            file_name: name.to_string(),
            ..self.clone()
        }
    }
}

/// Caller-supplied upload options. Validated per request, never stored.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UploadOptions {
    /// Explicit object name. Reusing one overwrites the prior object at
    /// the same key; downstream caches may serve the old bytes for a
    /// provider-dependent window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_file_name: Option<String>,

    /// URL of an object to delete once this upload is confirmed present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_target_url: Option<String>,

    /// Marks the upload temporary: it must be confirmed within the
    /// reclamation window or the reaper deletes it.
    #[serde(default)]
    pub temporary: bool,
}

/// A short-lived authorization to perform one direct upload.
///
/// The grant itself carries no bytes; the client streams the payload to
/// `signed_url` before `expires_at`. The store, not the broker, rejects
/// late transfers.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadGrant {
    /// Bucket the grant was issued against.
    pub bucket: String,

    /// Full object key the upload is scoped to.
    pub object_key: String,

    /// Time-boxed URL accepting exactly one key and content type.
    pub signed_url: String,

    /// Stable URL where the object will be retrievable after upload.
    pub public_url: String,

    /// Expiry of `signed_url`; always in the future at issuance.
    pub expires_at: DateTime<Utc>,

    /// Opaque correlation token for `confirm_upload`.
    pub upload_id: Uuid,

    /// Whether the client must confirm after transfer (temporary or
    /// replacing uploads).
    pub confirm_required: bool,
}

/// Reference to a granted upload: by correlation token or object key.
#[derive(Clone, Debug)]
pub enum UploadRef {
    Id(Uuid),
    Key(String),
}

impl fmt::Display for UploadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadRef::Id(id) => write!(f, "{}", id),
            UploadRef::Key(key) => write!(f, "{}", key),
        }
    }
}

/// Result of a confirm call. A repeated confirm is a no-op success so
/// duplicate client retries stay harmless.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmOutcome {
    Confirmed,
    AlreadyConfirmed,
}

/// A read URL for an existing object.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AccessUrl {
    pub url: String,

    /// Absent for public buckets whose URLs never expire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// The operations a framework adapter can dispatch.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    RequestUpload,
    ConfirmUpload,
    RequestAccess,
    DeleteFile,
}

/// Framework-agnostic request descriptor.
///
/// Each framework adapter translates its native request into this shape
/// and performs no authorization or validation of its own. The context
/// is whatever the embedding application's authentication produced; the
/// broker passes it through to bucket hooks untouched.
#[derive(Clone, Debug)]
pub struct AdapterRequest<C> {
    pub bucket: String,
    pub operation: Operation,
    pub body: serde_json::Value,
    pub context: C,
}

/// Framework-agnostic response descriptor.
#[derive(Clone, Debug)]
pub struct AdapterResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// JSON body of a `request-upload` call.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadRequestBody {
    #[serde(flatten)]
    pub metadata: UploadMetadata,
    #[serde(default)]
    pub options: UploadOptions,
}

/// JSON body of a `confirm-upload` call. One of the two fields must be
/// present; `upload_id` wins when both are.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ConfirmRequestBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
}

impl ConfirmRequestBody {
    pub fn to_ref(&self) -> Option<UploadRef> {
        match (&self.upload_id, &self.object_key) {
            (Some(id), _) => Some(UploadRef::Id(*id)),
            (None, Some(key)) => Some(UploadRef::Key(key.clone())),
            (None, None) => None,
        }
    }
}

/// JSON body of `request-access` and `delete-file` calls.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ObjectRequestBody {
    pub object_key: String,
}
