//! The request dispatcher: authorization, validation, and signed-URL
//! issuance for every bucket operation.
//!
//! The dispatcher is stateless per call — safe for unbounded concurrent
//! invocation. Its only shared mutable resource is the registry; the
//! router table is read-only after startup. `request_upload` is safe to
//! retry (every call mints a fresh key and grant); `confirm_upload` is
//! idempotent beyond the first success.

use crate::errors::DispatchError;
use crate::models::bucket::{BucketDefinition, Decision};
use crate::models::upload::{
    AccessUrl, AdapterRequest, AdapterResponse, ConfirmOutcome, ConfirmRequestBody,
    ObjectRequestBody, Operation, UploadGrant, UploadMetadata, UploadOptions, UploadRef,
    UploadRequestBody,
};
use crate::router::BucketRouter;
use crate::services::object_store::{ObjectStore, UploadUrlRequest};
use crate::services::registry::{MarkResult, NewTempUpload, TempFileRegistry};
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Validity window of upload URLs.
pub const UPLOAD_URL_TTL_SECS: i64 = 3_600;

/// Validity window of signed read URLs.
pub const READ_URL_TTL_SECS: i64 = 900;

/// Mediates every request between callers and the object store.
///
/// `C` is the caller context: produced by the embedding application's
/// authentication, threaded through to bucket hooks, and snapshotted
/// into registry records. The dispatcher never inspects its shape.
pub struct Dispatcher<C> {
    router: BucketRouter<C>,
    store: Arc<dyn ObjectStore>,
    registry: TempFileRegistry,
}

impl<C> std::fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("buckets", &self.router.bucket_names().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<C> Dispatcher<C>
where
    C: Serialize + Send + Sync + 'static,
{
    pub fn new(router: BucketRouter<C>, store: Arc<dyn ObjectStore>, registry: TempFileRegistry) -> Self {
        Self {
            router,
            store,
            registry,
        }
    }

    pub fn registry(&self) -> &TempFileRegistry {
        &self.registry
    }

    fn resolve(&self, bucket: &str) -> Result<&BucketDefinition<C>, DispatchError> {
        self.router
            .resolve(bucket)
            .ok_or_else(|| DispatchError::UnknownBucket(bucket.to_string()))
    }

    /// Keys are bucket-prefixed; an operation addressed to one bucket
    /// must not reach into another's namespace.
    fn ensure_key_in_bucket(bucket: &str, key: &str) -> Result<(), DispatchError> {
        if key.strip_prefix(bucket).and_then(|rest| rest.strip_prefix('/')).is_some() {
            Ok(())
        } else {
            Err(DispatchError::Validation(format!(
                "object key `{key}` does not belong to bucket `{bucket}`"
            )))
        }
    }

    /// Authorize and validate an upload, then issue a grant.
    ///
    /// No signed URL is generated — the store is not even called — when
    /// validation or authorization fails. The grant's `expires_at` is
    /// always in the future at issuance; rejection after expiry is the
    /// store's job.
    pub async fn request_upload(
        &self,
        bucket: &str,
        meta: &UploadMetadata,
        ctx: &C,
        options: &UploadOptions,
    ) -> Result<UploadGrant, DispatchError> {
        let def = self.resolve(bucket)?;

        if let Some(limit) = def.size_limit() {
            if meta.size_bytes > limit {
                return Err(DispatchError::Validation(format!(
                    "file of {} bytes exceeds the {} byte limit for bucket `{}`",
                    meta.size_bytes,
                    limit,
                    def.name()
                )));
            }
        }
        if !def.kind().accepts(&meta.content_type) {
            return Err(DispatchError::Validation(format!(
                "content type `{}` is not allowed for bucket `{}`",
                meta.content_type,
                def.name()
            )));
        }

        if let Decision::Deny(reason) = def.authorize_upload(ctx, meta).await {
            return Err(DispatchError::Denied(reason));
        }

        // Resolve the replacement target before any side effect so a bad
        // URL fails the whole request.
        let replace_key = match &options.replace_target_url {
            Some(url) => Some(self.store.object_key_from_url(url).ok_or_else(|| {
                DispatchError::Validation(format!(
                    "replace target url `{url}` does not belong to this store"
                ))
            })?),
            None => None,
        };

        // Manual names map to a deterministic key: reuse overwrites the
        // prior object. Otherwise a uniqueness token keeps concurrent
        // uploads collision-free.
        let named = match &options.manual_file_name {
            Some(name) => meta.with_file_name(name),
            None => meta.with_file_name(&uniquify(&meta.file_name)),
        };
        let object_key = format!("{}/{}", def.name(), def.relative_key(ctx, &named));

        let expires_at = Utc::now() + Duration::seconds(UPLOAD_URL_TTL_SECS);
        let signed_url = self
            .store
            .generate_upload_url(&UploadUrlRequest {
                key: object_key.clone(),
                content_type: meta.content_type.clone(),
                max_size_bytes: def.size_limit(),
                ttl: Duration::seconds(UPLOAD_URL_TTL_SECS),
                thumbnails: def.kind().wants_thumbnails(),
            })
            .await?;

        let upload_id = Uuid::new_v4();
        let confirm_required = options.temporary || replace_key.is_some();
        if confirm_required {
            self.registry
                .insert(&NewTempUpload {
                    object_key: object_key.clone(),
                    bucket_name: def.name().to_string(),
                    upload_id,
                    created_at: Utc::now(),
                    is_temporary: options.temporary,
                    replace_key,
                    uploader_context: serde_json::to_string(ctx).ok(),
                })
                .await?;
        }

        debug!(bucket = def.name(), key = %object_key, temporary = options.temporary, "upload granted");
        Ok(UploadGrant {
            bucket: def.name().to_string(),
            public_url: self.store.public_url(&object_key),
            object_key,
            signed_url,
            expires_at,
            upload_id,
            confirm_required,
        })
    }

    /// Mark a granted upload confirmed.
    ///
    /// The first confirm is the completion signal for replacements: only
    /// now is the replaced object deleted, so the old object is never
    /// gone before the new one is present. A failed replacement delete
    /// is left on the record for the sweep to retry. Duplicate confirms
    /// are no-op successes; a reaped or deleted record is not-found.
    pub async fn confirm_upload(
        &self,
        reference: &UploadRef,
        _ctx: &C,
    ) -> Result<ConfirmOutcome, DispatchError> {
        match self.registry.mark_confirmed(reference).await? {
            MarkResult::Confirmed(record) => {
                if let Some(old_key) = &record.replace_key {
                    match self.store.delete_object(old_key).await {
                        Ok(()) => {
                            self.registry.clear_replace_key(&record.object_key).await?;
                            debug!(old = %old_key, new = %record.object_key, "replaced object deleted");
                        }
                        Err(err) => {
                            warn!(
                                old = %old_key,
                                error = %err,
                                "replacement delete failed; sweep will retry"
                            );
                        }
                    }
                }
                Ok(ConfirmOutcome::Confirmed)
            }
            MarkResult::AlreadyConfirmed => Ok(ConfirmOutcome::AlreadyConfirmed),
            MarkResult::NotFound => Err(DispatchError::RecordNotFound(reference.to_string())),
        }
    }

    /// Issue a read URL: stable for public buckets, signed and
    /// short-lived otherwise.
    pub async fn request_access(
        &self,
        bucket: &str,
        object_key: &str,
        ctx: &C,
    ) -> Result<AccessUrl, DispatchError> {
        let def = self.resolve(bucket)?;
        Self::ensure_key_in_bucket(def.name(), object_key)?;
        if let Decision::Deny(reason) = def.authorize_access(ctx, object_key).await {
            return Err(DispatchError::Denied(reason));
        }

        if def.is_public() {
            return Ok(AccessUrl {
                url: self.store.public_url(object_key),
                expires_at: None,
            });
        }
        let ttl = Duration::seconds(READ_URL_TTL_SECS);
        let url = self.store.generate_read_url(object_key, ttl).await?;
        Ok(AccessUrl {
            url,
            expires_at: Some(Utc::now() + ttl),
        })
    }

    /// Delete an object and whatever registry record points at it.
    pub async fn delete_file(
        &self,
        bucket: &str,
        object_key: &str,
        ctx: &C,
    ) -> Result<(), DispatchError> {
        let def = self.resolve(bucket)?;
        Self::ensure_key_in_bucket(def.name(), object_key)?;
        if let Decision::Deny(reason) = def.authorize_delete(ctx, object_key).await {
            return Err(DispatchError::Denied(reason));
        }

        self.store.delete_object(object_key).await?;
        self.registry.remove(object_key).await?;
        debug!(bucket = def.name(), key = %object_key, "file deleted");
        Ok(())
    }

    /// The framework-agnostic call contract.
    ///
    /// Adapters translate their native request into an
    /// [`AdapterRequest`] and this method back into a transport
    /// response; they perform no authorization or validation of their
    /// own.
    pub async fn handle(&self, req: AdapterRequest<C>) -> AdapterResponse {
        let result = match req.operation {
            Operation::RequestUpload => match parse_body::<UploadRequestBody>(req.body) {
                Ok(body) => self
                    .request_upload(&req.bucket, &body.metadata, &req.context, &body.options)
                    .await
                    .map(|grant| json!(grant)),
                Err(err) => Err(err),
            },
            Operation::ConfirmUpload => match parse_body::<ConfirmRequestBody>(req.body) {
                Ok(body) => match body.to_ref() {
                    Some(reference) => self
                        .confirm_upload(&reference, &req.context)
                        .await
                        .map(|outcome| json!({ "outcome": outcome })),
                    None => Err(DispatchError::Validation(
                        "confirm requires `upload_id` or `object_key`".to_string(),
                    )),
                },
                Err(err) => Err(err),
            },
            Operation::RequestAccess => match parse_body::<ObjectRequestBody>(req.body) {
                Ok(body) => self
                    .request_access(&req.bucket, &body.object_key, &req.context)
                    .await
                    .map(|access| json!(access)),
                Err(err) => Err(err),
            },
            Operation::DeleteFile => match parse_body::<ObjectRequestBody>(req.body) {
                Ok(body) => self
                    .delete_file(&req.bucket, &body.object_key, &req.context)
                    .await
                    .map(|()| json!({ "deleted": body.object_key })),
                Err(err) => Err(err),
            },
        };

        match result {
            Ok(body) => AdapterResponse { status: 200, body },
            Err(err) => AdapterResponse {
                status: err.status().as_u16(),
                body: err.to_body(),
            },
        }
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(
    body: serde_json::Value,
) -> Result<T, DispatchError> {
    serde_json::from_value(body)
        .map_err(|err| DispatchError::Validation(format!("invalid request body: {err}")))
}

/// Inject a uniqueness token before the extension so concurrent uploads
/// of the same logical file never collide.
fn uniquify(file_name: &str) -> String {
    let token = Uuid::new_v4().simple().to_string();
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{token}.{ext}"),
        _ => format!("{file_name}-{token}"),
    }
}

#[cfg(test)]
mod tests {
    use super::uniquify;

    #[test]
    fn uniquify_keeps_the_extension() {
        let name = uniquify("report.pdf");
        assert!(name.starts_with("report-"));
        assert!(name.ends_with(".pdf"));
        assert_ne!(uniquify("report.pdf"), uniquify("report.pdf"));
    }

    #[test]
    fn uniquify_handles_extensionless_names() {
        let name = uniquify("README");
        assert!(name.starts_with("README-"));
        assert!(!name.contains('.'));
    }
}
