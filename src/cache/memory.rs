use crate::cache::{CacheStats, ResponseCache};
use crate::error::Result;
use crate::lock::deadline_after;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Process-local response cache with per-entry TTL.
#[derive(Default)]
pub struct InMemoryResponseCache {
    entries: RwLock<HashMap<String, Entry>>,
    stats: Arc<CacheStats>,
}

impl InMemoryResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        self.stats.clone()
    }

    /// Drops every entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ResponseCache for InMemoryResponseCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                self.stats.record_hit();
                Ok(Some(entry.value.clone()))
            }
            _ => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: deadline_after(ttl),
            },
        );
        self.stats.record_write();
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        if self.entries.write().await.remove(key).is_some() {
            self.stats.record_invalidation();
        }
        Ok(())
    }
}
