use crate::error::{AppError, Result};
use crate::lock::{with_lock, LockProvider};
use crate::models::IdempotencyStatus;
use crate::observability::get_metrics;
use crate::store::PostgresIdempotencyStore;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Lock taken around each purge when several instances share one store.
pub const RETENTION_LOCK: &str = "idempotency:retention";

/// Background purge of resolved idempotency records.
pub struct RetentionJob {
    store: PostgresIdempotencyStore,
    retention: ChronoDuration,
    interval: Duration,
    lock: Option<Arc<dyn LockProvider>>,
}

impl RetentionJob {
    pub fn new(store: PostgresIdempotencyStore, retention_days: i64, interval: Duration) -> Self {
        Self {
            store,
            retention: ChronoDuration::days(retention_days),
            interval,
            lock: None,
        }
    }

    /// Runs each purge under [`RETENTION_LOCK`] so that only one instance
    /// purges per tick.
    pub fn with_lock_provider(mut self, lock: Arc<dyn LockProvider>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Runs the purge once and refreshes the in-progress gauge.
    pub async fn run_once(&self) -> Result<u64> {
        let cutoff = Utc::now() - self.retention;
        let purged = self.store.purge_resolved_before(cutoff).await?;
        get_metrics().record_purged_records(purged);

        let in_progress = self.store.count_by_status(IdempotencyStatus::InProgress).await?;
        get_metrics().set_in_progress_records(in_progress);
        if in_progress > 0 {
            tracing::debug!(in_progress, "Records still marked in progress");
        }

        Ok(purged)
    }

    /// Runs the purge unless another instance holds the retention lock.
    /// Returns `Ok(None)` when this tick was skipped.
    pub async fn run_exclusive(&self) -> Result<Option<u64>> {
        let Some(lock) = &self.lock else {
            return self.run_once().await.map(Some);
        };

        match with_lock(lock.clone(), RETENTION_LOCK, Duration::ZERO, self.interval, || self.run_once()).await {
            Ok(purged) => purged.map(Some),
            Err(AppError::LockUnavailable { .. }) => {
                tracing::debug!("Retention lock held elsewhere, skipping purge");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Starts the purge in a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);

            loop {
                interval.tick().await;

                match self.run_exclusive().await {
                    Ok(Some(count)) if count > 0 => {
                        tracing::info!("Purged {} resolved idempotency records", count);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("Failed to purge idempotency records: {}", e);
                    }
                }
            }
        })
    }
}
