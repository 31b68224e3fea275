use crate::error::{AppError, Result};
use crate::lock::{deadline_after, LockHandle, LockProvider, RetryPolicy};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Lease {
    token: String,
    expires_at: Instant,
}

/// Process-local lock provider with the same lease semantics as Redis.
#[derive(Default)]
pub struct InMemoryLockProvider {
    leases: Mutex<HashMap<String, Lease>>,
    policy: RetryPolicy,
}

impl InMemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_policy(policy: RetryPolicy) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Returns true if an unexpired lease exists for `name`.
    pub async fn is_locked(&self, name: &str) -> bool {
        let leases = self.leases.lock().await;
        leases
            .get(name)
            .map(|l| l.expires_at > Instant::now())
            .unwrap_or(false)
    }
}

#[async_trait]
impl LockProvider for InMemoryLockProvider {
    async fn try_acquire(&self, name: &str, lease_time: Duration) -> Result<Option<LockHandle>> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();

        if let Some(existing) = leases.get(name) {
            if existing.expires_at > now {
                return Ok(None);
            }
        }

        let handle = LockHandle::new(name, lease_time);
        leases.insert(
            name.to_string(),
            Lease {
                token: handle.token.clone(),
                expires_at: deadline_after(lease_time),
            },
        );
        Ok(Some(handle))
    }

    async fn release(&self, handle: &LockHandle) -> Result<()> {
        let mut leases = self.leases.lock().await;
        match leases.get(&handle.name) {
            Some(lease) if lease.token == handle.token && lease.expires_at > Instant::now() => {
                leases.remove(&handle.name);
                Ok(())
            }
            _ => Err(AppError::LockLost {
                key: handle.name.clone(),
            }),
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }
}
