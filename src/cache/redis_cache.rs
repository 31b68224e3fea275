use crate::cache::{CacheStats, ResponseCache};
use crate::error::{AppError, Result};
use crate::observability::{get_metrics, LatencyTimer};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;

/// Redis-based cache for encoded responses.
///
/// Connection problems on reads are reported as misses so the coordinator
/// falls back to the store.
pub struct RedisResponseCache {
    client: redis::Client,
    stats: Arc<CacheStats>,
}

impl RedisResponseCache {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> Arc<CacheStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl ResponseCache for RedisResponseCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let timer = LatencyTimer::new();

        let mut conn = match self.client.get_multiplexed_async_connection().await {
            Ok(c) => c,
            Err(e) => {
                self.stats.record_error();
                tracing::warn!("Redis connection error in cache get: {}", e);
                return Ok(None);
            }
        };

        let value: Option<Vec<u8>> = match conn.get(key).await {
            Ok(v) => v,
            Err(e) => {
                self.stats.record_error();
                get_metrics().record_redis_operation("get", timer.elapsed_ms(), false);
                tracing::warn!("Redis get error: {}", e);
                return Ok(None);
            }
        };

        get_metrics().record_redis_operation("get", timer.elapsed_ms(), true);

        match value {
            Some(bytes) => {
                self.stats.record_hit();
                tracing::debug!(key = %key, bytes = bytes.len(), "Cache hit for response");
                Ok(Some(bytes))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let timer = LatencyTimer::new();

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                self.stats.record_error();
                AppError::Redis(e)
            })?;

        let ttl_secs = ttl.as_secs().max(1);
        match conn.set_ex::<_, _, ()>(key, value, ttl_secs).await {
            Ok(_) => {
                self.stats.record_write();
                get_metrics().record_redis_operation("set", timer.elapsed_ms(), true);
                tracing::debug!(key = %key, ttl_secs = ttl_secs, "Cached response");
                Ok(())
            }
            Err(e) => {
                self.stats.record_error();
                get_metrics().record_redis_operation("set", timer.elapsed_ms(), false);
                Err(AppError::Redis(e))
            }
        }
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::Redis)?;

        conn.del::<_, ()>(key).await.map_err(|e| {
            self.stats.record_error();
            AppError::Redis(e)
        })?;

        self.stats.record_invalidation();
        tracing::debug!(key = %key, "Invalidated cached response");
        Ok(())
    }
}
