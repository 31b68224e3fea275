use crate::error::{AppError, Result};
use crate::lock::{LockHandle, LockProvider, RetryPolicy};
use async_trait::async_trait;
use std::time::Duration;

/// Deletes the key only if it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed lock provider using `SET NX PX` leases.
///
/// Lock keys live under `lock:` so they never collide with cached responses
/// stored under the bare operation key.
pub struct RedisLockProvider {
    client: redis::Client,
    policy: RetryPolicy,
    release_script: redis::Script,
}

impl RedisLockProvider {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
            release_script: redis::Script::new(RELEASE_SCRIPT),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn lock_key(name: &str) -> String {
        format!("lock:{}", name)
    }
}

#[async_trait]
impl LockProvider for RedisLockProvider {
    async fn try_acquire(&self, name: &str, lease_time: Duration) -> Result<Option<LockHandle>> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::Redis)?;

        let handle = LockHandle::new(name, lease_time);
        let lease_ms = u64::try_from(lease_time.as_millis().max(1)).unwrap_or(u64::MAX);

        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::lock_key(name))
            .arg(&handle.token)
            .arg("NX")
            .arg("PX")
            .arg(lease_ms)
            .query_async(&mut conn)
            .await
            .map_err(AppError::Redis)?;

        Ok(reply.map(|_| handle))
    }

    async fn release(&self, handle: &LockHandle) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::Redis)?;

        let deleted: i64 = self
            .release_script
            .key(Self::lock_key(&handle.name))
            .arg(&handle.token)
            .invoke_async(&mut conn)
            .await
            .map_err(AppError::Redis)?;

        if deleted == 0 {
            return Err(AppError::LockLost {
                key: handle.name.clone(),
            });
        }

        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_format() {
        assert_eq!(RedisLockProvider::lock_key("req-1:APP"), "lock:req-1:APP");
        assert_eq!(RedisLockProvider::lock_key("idem:req-1:APP"), "lock:idem:req-1:APP");
    }
}
