use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-coordinator counters.
#[derive(Debug, Default)]
pub struct IdempotencyMetrics {
    pub total_requests: AtomicU64,
    pub fail_open_requests: AtomicU64,
    pub cache_hits: AtomicU64,
    pub store_replays: AtomicU64,
    pub executions: AtomicU64,
    pub handler_failures: AtomicU64,
    pub in_progress_rejections: AtomicU64,
    pub lock_rejections: AtomicU64,
}

impl IdempotencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fail_open(&self) {
        self.fail_open_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_replay(&self) {
        self.store_replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_execution(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_in_progress_rejection(&self) {
        self.in_progress_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_rejection(&self) {
        self.lock_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            fail_open_requests: self.fail_open_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            store_replays: self.store_replays.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            in_progress_rejections: self.in_progress_rejections.load(Ordering::Relaxed),
            lock_rejections: self.lock_rejections.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub fail_open_requests: u64,
    pub cache_hits: u64,
    pub store_replays: u64,
    pub executions: u64,
    pub handler_failures: u64,
    pub in_progress_rejections: u64,
    pub lock_rejections: u64,
}

impl MetricsSnapshot {
    /// Share of guarded calls answered without running the handler.
    pub fn replay_rate(&self) -> f64 {
        let guarded = self.total_requests.saturating_sub(self.fail_open_requests);
        if guarded == 0 {
            0.0
        } else {
            (self.cache_hits + self.store_replays) as f64 / guarded as f64
        }
    }

    pub fn duplicate_rejections(&self) -> u64 {
        self.in_progress_rejections + self.lock_rejections
    }
}
