//! End-to-end properties of the dispatcher pipeline, the registry, and
//! the reaper, driven against an in-memory registry and a counting
//! object-store stub.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use upload_broker::errors::DispatchError;
use upload_broker::models::bucket::{BucketDefinition, BucketKind, Decision, HookTarget};
use upload_broker::models::upload::{
    AdapterRequest, ConfirmOutcome, Operation, UploadMetadata, UploadOptions, UploadRef,
};
use upload_broker::router::RouterBuilder;
use upload_broker::services::dispatcher::Dispatcher;
use upload_broker::services::object_store::{ObjectStore, ProviderError, UploadUrlRequest};
use upload_broker::services::reaper::Reaper;
use upload_broker::services::registry::TempFileRegistry;

#[derive(Default)]
struct MockStore {
    upload_urls: AtomicUsize,
    read_urls: AtomicUsize,
    deletes: std::sync::Mutex<Vec<String>>,
    fail_upload_urls: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MockStore {
    fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MockStore {
    async fn generate_upload_url(&self, req: &UploadUrlRequest) -> Result<String, ProviderError> {
        if self.fail_upload_urls.load(Ordering::SeqCst) {
            return Err(ProviderError::Unreachable("mock store is down".into()));
        }
        self.upload_urls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("mock://upload/{}", req.key))
    }

    async fn generate_read_url(
        &self,
        key: &str,
        _ttl: Duration,
    ) -> Result<String, ProviderError> {
        self.read_urls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("mock://read/{key}"))
    }

    async fn delete_object(&self, key: &str) -> Result<(), ProviderError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ProviderError::Unreachable("mock store is down".into()));
        }
        // absent objects are a no-op success by contract
        self.deletes.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("mock://public/{key}")
    }

    fn object_key_from_url(&self, url: &str) -> Option<String> {
        url.strip_prefix("mock://public/").map(String::from)
    }
}

struct Harness {
    dispatcher: Dispatcher<Value>,
    store: Arc<MockStore>,
    registry: TempFileRegistry,
    pool: Arc<SqlitePool>,
}

async fn harness() -> Harness {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    for stmt in include_str!("../migrations/0001_init.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sqlx::query(stmt).execute(&pool).await.unwrap();
    }
    let pool = Arc::new(pool);
    let registry = TempFileRegistry::new(pool.clone());
    let store = Arc::new(MockStore::default());

    let router = RouterBuilder::<Value>::new()
        .register(BucketDefinition::new("files", BucketKind::File).max_size_bytes(10_000_000))
        .unwrap()
        .register(
            BucketDefinition::new("images", BucketKind::Image { thumbnails: false })
                .max_size_bytes(5_000_000)
                .public(),
        )
        .unwrap()
        .register(BucketDefinition::new("vault", BucketKind::File).on_upload(deny_all))
        .unwrap()
        .build();

    Harness {
        dispatcher: Dispatcher::new(router, store.clone(), registry.clone()),
        store,
        registry,
        pool,
    }
}

fn deny_all(_: &Value, _: HookTarget<'_>) -> Decision {
    Decision::Deny("not allowed".into())
}

fn ctx() -> Value {
    json!({ "user": "u-1" })
}

fn jpeg(size: u64) -> UploadMetadata {
    UploadMetadata {
        file_name: "photo.jpg".into(),
        content_type: "image/jpeg".into(),
        size_bytes: size,
    }
}

async fn backdate(pool: &SqlitePool, key: &str, hours: i64) {
    sqlx::query("UPDATE temp_uploads SET created_at = ? WHERE object_key = ?")
        .bind(Utc::now() - Duration::hours(hours))
        .bind(key)
        .execute(pool)
        .await
        .unwrap();
}

async fn record_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM temp_uploads")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn oversized_upload_never_reaches_the_store() {
    let h = harness().await;
    let err = h
        .dispatcher
        .request_upload("images", &jpeg(10_000_000), &ctx(), &UploadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
    assert!(err.to_string().contains("5000000"));
    assert_eq!(h.store.upload_urls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn image_buckets_reject_non_image_content_types() {
    let h = harness().await;
    let meta = UploadMetadata {
        file_name: "report.pdf".into(),
        content_type: "application/pdf".into(),
        size_bytes: 1_000,
    };
    let err = h
        .dispatcher
        .request_upload("images", &meta, &ctx(), &UploadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
    assert_eq!(h.store.upload_urls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn denied_hook_generates_no_signed_url() {
    let h = harness().await;
    let meta = UploadMetadata {
        file_name: "secret.txt".into(),
        content_type: "text/plain".into(),
        size_bytes: 10,
    };
    let err = h
        .dispatcher
        .request_upload("vault", &meta, &ctx(), &UploadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Denied(_)));
    assert_eq!(h.store.upload_urls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_bucket_is_not_found() {
    let h = harness().await;
    let err = h
        .dispatcher
        .request_upload("nope", &jpeg(100), &ctx(), &UploadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::UnknownBucket(_)));
}

#[tokio::test]
async fn plain_grants_have_future_expiry_and_no_record() {
    let h = harness().await;
    let grant = h
        .dispatcher
        .request_upload("images", &jpeg(2_000_000), &ctx(), &UploadOptions::default())
        .await
        .unwrap();
    assert!(grant.expires_at > Utc::now());
    assert!(!grant.confirm_required);
    assert!(grant.object_key.starts_with("images/"));
    assert_eq!(grant.signed_url, format!("mock://upload/{}", grant.object_key));
    assert_eq!(record_count(&h.pool).await, 0);
}

#[tokio::test]
async fn manual_file_names_are_deterministic_and_generated_keys_are_not() {
    let h = harness().await;
    let options = UploadOptions {
        manual_file_name: Some("logo.png".into()),
        ..Default::default()
    };
    let first = h
        .dispatcher
        .request_upload("images", &jpeg(1_000), &ctx(), &options)
        .await
        .unwrap();
    let second = h
        .dispatcher
        .request_upload("images", &jpeg(1_000), &ctx(), &options)
        .await
        .unwrap();
    assert_eq!(first.object_key, "images/logo.png");
    assert_eq!(second.object_key, first.object_key);

    let a = h
        .dispatcher
        .request_upload("images", &jpeg(1_000), &ctx(), &UploadOptions::default())
        .await
        .unwrap();
    let b = h
        .dispatcher
        .request_upload("images", &jpeg(1_000), &ctx(), &UploadOptions::default())
        .await
        .unwrap();
    assert_ne!(a.object_key, b.object_key);
    assert!(a.object_key.ends_with(".jpg"));
}

#[tokio::test]
async fn confirm_is_idempotent_and_one_record_ends_removed() {
    let h = harness().await;
    let options = UploadOptions {
        temporary: true,
        ..Default::default()
    };
    let grant = h
        .dispatcher
        .request_upload("images", &jpeg(1_000), &ctx(), &options)
        .await
        .unwrap();
    assert!(grant.confirm_required);

    let record = h.registry.get(&grant.object_key).await.unwrap().unwrap();
    assert!(!record.confirmed);
    assert!(record.is_temporary);

    let reference = UploadRef::Id(grant.upload_id);
    assert_eq!(
        h.dispatcher.confirm_upload(&reference, &ctx()).await.unwrap(),
        ConfirmOutcome::Confirmed
    );
    assert_eq!(
        h.dispatcher.confirm_upload(&reference, &ctx()).await.unwrap(),
        ConfirmOutcome::AlreadyConfirmed
    );

    // the confirmed leftover is swept away; the object is kept
    let reaper = Reaper::new(
        h.registry.clone(),
        h.store.clone(),
        std::time::Duration::from_secs(3600),
    );
    reaper.sweep(Utc::now()).await.unwrap();
    assert_eq!(record_count(&h.pool).await, 0);
    assert!(h.store.deletes().is_empty());
}

#[tokio::test]
async fn confirming_an_unknown_reference_is_terminal() {
    let h = harness().await;
    let err = h
        .dispatcher
        .confirm_upload(&UploadRef::Key("images/ghost.png".into()), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::RecordNotFound(_)));
}

#[tokio::test]
async fn delete_wins_over_a_late_confirm() {
    let h = harness().await;
    let options = UploadOptions {
        temporary: true,
        ..Default::default()
    };
    let grant = h
        .dispatcher
        .request_upload("images", &jpeg(1_000), &ctx(), &options)
        .await
        .unwrap();

    h.dispatcher
        .delete_file("images", &grant.object_key, &ctx())
        .await
        .unwrap();
    assert_eq!(h.store.deletes(), vec![grant.object_key.clone()]);
    assert!(h.registry.get(&grant.object_key).await.unwrap().is_none());

    let err = h
        .dispatcher
        .confirm_upload(&UploadRef::Id(grant.upload_id), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::RecordNotFound(_)));
}

#[tokio::test]
async fn provider_failure_surfaces_and_leaves_no_record() {
    let h = harness().await;
    h.store.fail_upload_urls.store(true, Ordering::SeqCst);
    let err = h
        .dispatcher
        .request_upload(
            "images",
            &jpeg(1_000),
            &ctx(),
            &UploadOptions {
                temporary: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Provider(_)));
    assert_eq!(record_count(&h.pool).await, 0);
}

#[tokio::test]
async fn replacement_deletes_the_old_object_only_at_confirm() {
    let h = harness().await;
    let options = UploadOptions {
        replace_target_url: Some("mock://public/files/old.txt".into()),
        ..Default::default()
    };
    let meta = UploadMetadata {
        file_name: "new.txt".into(),
        content_type: "text/plain".into(),
        size_bytes: 10,
    };
    let grant = h
        .dispatcher
        .request_upload("files", &meta, &ctx(), &options)
        .await
        .unwrap();
    assert!(grant.confirm_required);
    assert!(h.store.deletes().is_empty());

    h.dispatcher
        .confirm_upload(&UploadRef::Id(grant.upload_id), &ctx())
        .await
        .unwrap();
    assert_eq!(h.store.deletes(), vec!["files/old.txt".to_string()]);
}

#[tokio::test]
async fn foreign_replace_target_urls_are_rejected() {
    let h = harness().await;
    let options = UploadOptions {
        replace_target_url: Some("https://elsewhere.example/x".into()),
        ..Default::default()
    };
    let err = h
        .dispatcher
        .request_upload("files", &jpeg(1_000), &ctx(), &options)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
    assert_eq!(h.store.upload_urls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn abandoned_replacement_leaves_both_objects() {
    let h = harness().await;
    let options = UploadOptions {
        replace_target_url: Some("mock://public/files/old.txt".into()),
        ..Default::default()
    };
    let meta = UploadMetadata {
        file_name: "new.txt".into(),
        content_type: "text/plain".into(),
        size_bytes: 10,
    };
    let grant = h
        .dispatcher
        .request_upload("files", &meta, &ctx(), &options)
        .await
        .unwrap();
    backdate(&h.pool, &grant.object_key, 25).await;

    let reaper = Reaper::new(
        h.registry.clone(),
        h.store.clone(),
        std::time::Duration::from_secs(3600),
    );
    let stats = reaper.sweep(Utc::now()).await.unwrap();
    assert_eq!(stats.released, 1);
    assert_eq!(stats.reclaimed, 0);
    assert!(h.store.deletes().is_empty());
    assert_eq!(record_count(&h.pool).await, 0);
}

#[tokio::test]
async fn reaper_reclaims_only_past_the_threshold() {
    let h = harness().await;
    let options = UploadOptions {
        temporary: true,
        ..Default::default()
    };
    let expired = h
        .dispatcher
        .request_upload("images", &jpeg(1_000), &ctx(), &options)
        .await
        .unwrap();
    let fresh = h
        .dispatcher
        .request_upload("images", &jpeg(1_000), &ctx(), &options)
        .await
        .unwrap();
    backdate(&h.pool, &expired.object_key, 25).await;
    backdate(&h.pool, &fresh.object_key, 23).await;

    let reaper = Reaper::new(
        h.registry.clone(),
        h.store.clone(),
        std::time::Duration::from_secs(3600),
    );
    let stats = reaper.sweep(Utc::now()).await.unwrap();
    assert_eq!(stats.reclaimed, 1);
    assert_eq!(h.store.deletes(), vec![expired.object_key.clone()]);
    assert!(h.registry.get(&expired.object_key).await.unwrap().is_none());
    assert!(h.registry.get(&fresh.object_key).await.unwrap().is_some());
}

#[tokio::test]
async fn reaper_keeps_records_when_the_store_is_down() {
    let h = harness().await;
    let options = UploadOptions {
        temporary: true,
        ..Default::default()
    };
    let grant = h
        .dispatcher
        .request_upload("images", &jpeg(1_000), &ctx(), &options)
        .await
        .unwrap();
    backdate(&h.pool, &grant.object_key, 25).await;
    h.store.fail_deletes.store(true, Ordering::SeqCst);

    let reaper = Reaper::new(
        h.registry.clone(),
        h.store.clone(),
        std::time::Duration::from_secs(3600),
    );
    let stats = reaper.sweep(Utc::now()).await.unwrap();
    assert_eq!(stats.reclaimed, 0);
    // the record survives for the next sweep to retry
    assert!(h.registry.get(&grant.object_key).await.unwrap().is_some());

    h.store.fail_deletes.store(false, Ordering::SeqCst);
    let stats = reaper.sweep(Utc::now()).await.unwrap();
    assert_eq!(stats.reclaimed, 1);
}

#[tokio::test]
async fn public_buckets_skip_signing_on_access() {
    let h = harness().await;
    let access = h
        .dispatcher
        .request_access("images", "images/logo.png", &ctx())
        .await
        .unwrap();
    assert_eq!(access.url, "mock://public/images/logo.png");
    assert!(access.expires_at.is_none());
    assert_eq!(h.store.read_urls.load(Ordering::SeqCst), 0);

    let access = h
        .dispatcher
        .request_access("files", "files/doc.pdf", &ctx())
        .await
        .unwrap();
    assert_eq!(access.url, "mock://read/files/doc.pdf");
    assert!(access.expires_at.unwrap() > Utc::now());
    assert_eq!(h.store.read_urls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn operations_cannot_cross_bucket_namespaces() {
    let h = harness().await;
    let err = h
        .dispatcher
        .request_access("files", "images/logo.png", &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));

    let err = h
        .dispatcher
        .delete_file("files", "images/logo.png", &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
}

#[tokio::test]
async fn adapter_contract_maps_outcomes_to_statuses() {
    let h = harness().await;

    let ok = h
        .dispatcher
        .handle(AdapterRequest {
            bucket: "images".into(),
            operation: Operation::RequestUpload,
            body: json!({
                "file_name": "photo.jpg",
                "content_type": "image/jpeg",
                "size_bytes": 2_000_000,
            }),
            context: ctx(),
        })
        .await;
    assert_eq!(ok.status, 200);
    assert!(ok.body.get("signed_url").is_some());

    let missing = h
        .dispatcher
        .handle(AdapterRequest {
            bucket: "nope".into(),
            operation: Operation::RequestUpload,
            body: json!({
                "file_name": "photo.jpg",
                "content_type": "image/jpeg",
                "size_bytes": 1,
            }),
            context: ctx(),
        })
        .await;
    assert_eq!(missing.status, 404);
    assert_eq!(missing.body["kind"], "not_found");

    let malformed = h
        .dispatcher
        .handle(AdapterRequest {
            bucket: "images".into(),
            operation: Operation::RequestUpload,
            body: json!({ "file_name": "photo.jpg" }),
            context: ctx(),
        })
        .await;
    assert_eq!(malformed.status, 400);
    assert_eq!(malformed.body["kind"], "validation");
}
