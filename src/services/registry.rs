//! Temporary-upload registry backed by SQLite.
//!
//! The registry is the only shared mutable state in the system. Every
//! mutation is a single SQL statement, which gives the per-record
//! atomicity the confirm/delete/sweep races rely on: a confirm racing a
//! delete loses gracefully (the confirm reports not-found), and
//! duplicate confirms collapse to one state change.

use crate::models::temp_upload::TempUpload;
use crate::models::upload::UploadRef;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

const COLUMNS: &str = "object_key, bucket_name, upload_id, created_at, confirmed, is_temporary, \
                       replace_key, uploader_context";

/// Fields of a record at insertion time.
#[derive(Clone, Debug)]
pub struct NewTempUpload {
    pub object_key: String,
    pub bucket_name: String,
    pub upload_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub is_temporary: bool,
    pub replace_key: Option<String>,
    pub uploader_context: Option<String>,
}

/// What `mark_confirmed` observed.
#[derive(Debug)]
pub enum MarkResult {
    /// First confirm; the record (with its pending replacement, if any)
    /// is returned for follow-up work.
    Confirmed(TempUpload),
    /// The record was already confirmed. No-op success.
    AlreadyConfirmed,
    /// No record: never granted, reaped, or deleted.
    NotFound,
}

#[derive(Clone, Debug)]
pub struct TempFileRegistry {
    db: Arc<SqlitePool>,
}

impl TempFileRegistry {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a record for a fresh grant. Re-granting the same key
    /// (manual file names) refreshes the existing record.
    pub async fn insert(&self, record: &NewTempUpload) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO temp_uploads (object_key, bucket_name, upload_id, created_at, \
                                       confirmed, is_temporary, replace_key, uploader_context)
             VALUES (?, ?, ?, ?, 0, ?, ?, ?)
             ON CONFLICT(object_key) DO UPDATE SET
                 upload_id = excluded.upload_id,
                 created_at = excluded.created_at,
                 confirmed = 0,
                 is_temporary = excluded.is_temporary,
                 replace_key = excluded.replace_key,
                 uploader_context = excluded.uploader_context",
        )
        .bind(&record.object_key)
        .bind(&record.bucket_name)
        .bind(record.upload_id)
        .bind(record.created_at)
        .bind(record.is_temporary)
        .bind(&record.replace_key)
        .bind(&record.uploader_context)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn find(&self, r: &UploadRef) -> Result<Option<TempUpload>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM temp_uploads WHERE {} = ?", r.column());
        let mut q = sqlx::query_as::<_, TempUpload>(&query);
        q = match r {
            UploadRef::Id(id) => q.bind(*id),
            UploadRef::Key(key) => q.bind(key.clone()),
        };
        q.fetch_optional(&*self.db).await
    }

    pub async fn get(&self, object_key: &str) -> Result<Option<TempUpload>, sqlx::Error> {
        self.find(&UploadRef::Key(object_key.to_string())).await
    }

    /// Flip a record to confirmed. Single statement, so a concurrent
    /// delete or sweep can never observe a half-confirmed record.
    pub async fn mark_confirmed(&self, r: &UploadRef) -> Result<MarkResult, sqlx::Error> {
        let query = format!(
            "UPDATE temp_uploads SET confirmed = 1 WHERE {} = ? AND confirmed = 0 \
             RETURNING {COLUMNS}",
            r.column()
        );
        let mut q = sqlx::query_as::<_, TempUpload>(&query);
        q = match r {
            UploadRef::Id(id) => q.bind(*id),
            UploadRef::Key(key) => q.bind(key.clone()),
        };
        if let Some(record) = q.fetch_optional(&*self.db).await? {
            return Ok(MarkResult::Confirmed(record));
        }
        match self.find(r).await? {
            Some(existing) if existing.confirmed => Ok(MarkResult::AlreadyConfirmed),
            _ => Ok(MarkResult::NotFound),
        }
    }

    /// Drop the pending-replacement marker after the old object is gone.
    pub async fn clear_replace_key(&self, object_key: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE temp_uploads SET replace_key = NULL WHERE object_key = ?")
            .bind(object_key)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Remove a record unconditionally (file deletion path).
    pub async fn remove(&self, object_key: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM temp_uploads WHERE object_key = ?")
            .bind(object_key)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a record only while it is still unconfirmed — the sweep
    /// uses this so a confirm that lands mid-sweep wins.
    pub async fn remove_if_unconfirmed(&self, object_key: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM temp_uploads WHERE object_key = ? AND confirmed = 0")
                .bind(object_key)
                .execute(&*self.db)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Snapshot of unconfirmed records older than `cutoff`.
    pub async fn expired_unconfirmed(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TempUpload>, sqlx::Error> {
        sqlx::query_as::<_, TempUpload>(&format!(
            "SELECT {COLUMNS} FROM temp_uploads WHERE confirmed = 0 AND created_at < ? \
             ORDER BY created_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(&*self.db)
        .await
    }

    /// Snapshot of confirmed records awaiting cleanup.
    pub async fn confirmed_uploads(&self) -> Result<Vec<TempUpload>, sqlx::Error> {
        sqlx::query_as::<_, TempUpload>(&format!(
            "SELECT {COLUMNS} FROM temp_uploads WHERE confirmed = 1 ORDER BY created_at ASC"
        ))
        .fetch_all(&*self.db)
        .await
    }
}

impl UploadRef {
    fn column(&self) -> &'static str {
        match self {
            UploadRef::Id(_) => "upload_id",
            UploadRef::Key(_) => "object_key",
        }
    }
}
