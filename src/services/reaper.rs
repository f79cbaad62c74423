//! Periodic reclamation of unconfirmed temporary uploads.
//!
//! The sweep runs on its own schedule, never synchronously with a
//! client request, and never holds a lock across a store call: it
//! snapshots candidate records, then processes each independently,
//! re-checking record state immediately before acting so a confirm that
//! lands after the snapshot wins.

use crate::services::object_store::ObjectStore;
use crate::services::registry::TempFileRegistry;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Unconfirmed temporary uploads older than this are reclaimed.
pub const RECLAIM_AFTER_HOURS: i64 = 24;

/// Counters from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Expired temporary objects deleted from the store.
    pub reclaimed: usize,
    /// Records dropped without touching any object (abandoned
    /// replacements, confirmed leftovers).
    pub released: usize,
    /// Replacement deletions retried to completion.
    pub replaced: usize,
}

#[derive(Clone)]
pub struct Reaper {
    registry: TempFileRegistry,
    store: Arc<dyn ObjectStore>,
    period: std::time::Duration,
}

impl Reaper {
    pub fn new(
        registry: TempFileRegistry,
        store: Arc<dyn ObjectStore>,
        period: std::time::Duration,
    ) -> Self {
        Self {
            registry,
            store,
            period,
        }
    }

    /// Run sweeps forever on the configured period.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.sweep(Utc::now()).await {
                    Ok(stats) if stats == SweepStats::default() => {}
                    Ok(stats) => info!(
                        reclaimed = stats.reclaimed,
                        released = stats.released,
                        replaced = stats.replaced,
                        "sweep finished"
                    ),
                    Err(err) => warn!(error = %err, "sweep failed"),
                }
            }
        })
    }

    /// One reclamation pass at time `now`. Separated from the schedule
    /// so tests can drive it directly.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepStats, sqlx::Error> {
        let mut stats = SweepStats::default();
        let cutoff = now - Duration::hours(RECLAIM_AFTER_HOURS);

        for candidate in self.registry.expired_unconfirmed(cutoff).await? {
            // Re-check right before acting: a confirm may have landed
            // since the snapshot.
            let record = match self.registry.get(&candidate.object_key).await? {
                Some(record) if !record.confirmed => record,
                _ => continue,
            };

            if record.is_temporary {
                // Object first, then record: a crash in between leaves
                // an orphaned record that the next sweep clears, since
                // deleting an already-absent object is a no-op success.
                if let Err(err) = self.store.delete_object(&record.object_key).await {
                    warn!(key = %record.object_key, error = %err, "reclaim failed; keeping record");
                    continue;
                }
                if self.registry.remove_if_unconfirmed(&record.object_key).await? {
                    debug!(key = %record.object_key, "temporary upload reclaimed");
                    stats.reclaimed += 1;
                }
            } else {
                // Abandoned replacement: the new object was never
                // confirmed, so neither object is touched.
                if self.registry.remove_if_unconfirmed(&record.object_key).await? {
                    debug!(key = %record.object_key, "abandoned replacement released");
                    stats.released += 1;
                }
            }
        }

        // Confirmed records are garbage once any pending replacement
        // delete has gone through.
        for record in self.registry.confirmed_uploads().await? {
            if let Some(old_key) = &record.replace_key {
                if let Err(err) = self.store.delete_object(old_key).await {
                    warn!(old = %old_key, error = %err, "replacement delete still failing");
                    continue;
                }
                self.registry.clear_replace_key(&record.object_key).await?;
                stats.replaced += 1;
            }
            if self.registry.remove(&record.object_key).await? {
                stats.released += 1;
            }
        }

        Ok(stats)
    }
}

impl std::fmt::Debug for Reaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaper")
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}
