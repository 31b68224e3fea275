//! Named mutual-exclusion leases.
//!
//! The coordinator only depends on [`LockProvider`]; the Redis and in-memory
//! providers are interchangeable. Leases are never renewed: once
//! `lease_time` passes the lock is free again even if the holder is still
//! working.

pub mod memory;
pub mod redis_lock;

pub use memory::InMemoryLockProvider;
pub use redis_lock::RedisLockProvider;

use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Stand-in horizon for durations too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `Instant::now() + after`, saturating at a far-future instant instead of
/// panicking on overflow.
pub(crate) fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Proof of a held lease, required to release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub name: String,
    /// Unique per acquisition; release only succeeds for the current token.
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub lease: Duration,
}

impl LockHandle {
    pub fn new(name: impl Into<String>, lease: Duration) -> Self {
        Self {
            name: name.into(),
            token: Uuid::new_v4().to_string(),
            acquired_at: Utc::now(),
            lease,
        }
    }
}

/// Backoff between acquisition attempts while waiting for a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn next_backoff(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_backoff)
    }
}

#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Makes one attempt to take the lock. `Ok(None)` means it is held.
    async fn try_acquire(&self, name: &str, lease_time: Duration) -> Result<Option<LockHandle>>;

    /// Releases a lease. Returns `LockLost` if the lease already expired
    /// and the lock now belongs to someone else (or nobody).
    async fn release(&self, handle: &LockHandle) -> Result<()>;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Waits up to `wait_time` for the lock, retrying with exponential
    /// backoff. A zero wait makes exactly one attempt.
    async fn acquire(&self, name: &str, wait_time: Duration, lease_time: Duration) -> Result<LockHandle> {
        if name.is_empty() {
            return Err(AppError::Validation("Lock name must not be empty".to_string()));
        }

        let policy = self.retry_policy();
        let deadline = deadline_after(wait_time);
        let mut backoff = policy.initial_backoff;

        tracing::debug!(
            lock = %name,
            wait_ms = wait_time.as_millis() as u64,
            lease_ms = lease_time.as_millis() as u64,
            "Trying to acquire lock"
        );

        loop {
            match self.try_acquire(name, lease_time).await {
                Ok(Some(handle)) => {
                    tracing::debug!(lock = %name, token = %handle.token, "Lock acquired");
                    return Ok(handle);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(lock = %name, "Lock backend error: {}", e);
                    return Err(e);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::info!(lock = %name, "Lock not acquired within wait time");
                return Err(AppError::LockUnavailable {
                    key: name.to_string(),
                });
            }

            tokio::time::sleep(backoff.min(deadline - now)).await;
            backoff = policy.next_backoff(backoff);
        }
    }
}

/// Holds an acquired lease and releases it when dropped.
///
/// Prefer [`LockGuard::release`]; the drop path can only schedule the
/// release on the current tokio runtime and log its outcome.
pub struct LockGuard {
    provider: Arc<dyn LockProvider>,
    handle: Option<LockHandle>,
}

impl LockGuard {
    pub async fn acquire(
        provider: Arc<dyn LockProvider>,
        name: &str,
        wait_time: Duration,
        lease_time: Duration,
    ) -> Result<Self> {
        let handle = provider.acquire(name, wait_time, lease_time).await?;
        Ok(Self {
            provider,
            handle: Some(handle),
        })
    }

    pub fn handle(&self) -> Option<&LockHandle> {
        self.handle.as_ref()
    }

    pub async fn release(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => self.provider.release(&handle).await,
            None => Ok(()),
        }
    }

    /// Takes the lease out of the guard; dropping the guard afterwards does
    /// nothing.
    pub(crate) fn into_parts(mut self) -> (Arc<dyn LockProvider>, Option<LockHandle>) {
        let handle = self.handle.take();
        (self.provider.clone(), handle)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(lock = %handle.name, "No runtime to release dropped lock; it will expire with its lease");
            return;
        };

        let provider = self.provider.clone();
        runtime.spawn(async move {
            if let Err(e) = provider.release(&handle).await {
                tracing::warn!(lock = %handle.name, "Failed to release dropped lock: {}", e);
            }
        });
    }
}

/// Runs `operation` while holding the named lock.
///
/// Fails with `LockUnavailable` when the lock is not acquired within
/// `wait_time`; the operation then never runs. The lock is released on
/// every path, and a failed release is logged rather than returned.
pub async fn with_lock<F, Fut, T>(
    provider: Arc<dyn LockProvider>,
    name: &str,
    wait_time: Duration,
    lease_time: Duration,
    operation: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let guard = LockGuard::acquire(provider, name, wait_time, lease_time).await?;
    let value = operation().await;

    if let Err(e) = guard.release().await {
        tracing::warn!(lock = %name, "Failed to release lock: {}", e);
    }

    Ok(value)
}
