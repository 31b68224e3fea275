//! Readiness of the coordinator's collaborators.
//!
//! Three dependencies are checked: the record store (PostgreSQL), the
//! response cache (Redis) and the lock backend, which is exercised with a
//! real acquire/release round trip rather than a bare ping.

use crate::error::AppError;
use crate::lock::LockProvider;
use crate::models::IdempotencyStatus;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Ordered from best to worst, so the aggregate is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, HealthStatus::Degraded)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: Option<f64>,
    pub message: Option<String>,
}

impl DependencyHealth {
    /// Healthy when the check finished within `budget`, degraded otherwise.
    pub fn measured(name: &str, started: Instant, budget: Duration) -> Self {
        let elapsed = started.elapsed();
        let (status, message) = if elapsed > budget {
            (
                HealthStatus::Degraded,
                Some(format!("slower than {}ms", budget.as_millis())),
            )
        } else {
            (HealthStatus::Healthy, None)
        };

        Self {
            name: name.to_string(),
            status,
            latency_ms: Some(elapsed.as_secs_f64() * 1000.0),
            message,
        }
    }

    pub fn failed(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(message.into()),
        }
    }

    fn with_message(mut self, message: String) -> Self {
        self.message = Some(match self.message.take() {
            Some(existing) => format!("{}; {}", existing, message),
            None => message,
        });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedHealth {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: Vec<DependencyHealth>,
}

impl AggregatedHealth {
    pub fn new(version: String, uptime_seconds: u64, dependencies: Vec<DependencyHealth>) -> Self {
        let status = dependencies
            .iter()
            .map(|d| d.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            version,
            uptime_seconds,
            dependencies,
        }
    }
}

/// Latency budgets before a dependency counts as degraded, and the hard
/// timeout after which it counts as down.
#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    pub store: Duration,
    pub cache: Duration,
    pub lock: Duration,
    pub timeout: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            store: Duration::from_millis(100),
            cache: Duration::from_millis(50),
            lock: Duration::from_millis(50),
            timeout: Duration::from_secs(5),
        }
    }
}

pub struct HealthChecker {
    pool: PgPool,
    cache_client: redis::Client,
    lock: Arc<dyn LockProvider>,
    thresholds: HealthThresholds,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(pool: PgPool, cache_client: redis::Client, lock: Arc<dyn LockProvider>) -> Self {
        Self {
            pool,
            cache_client,
            lock,
            thresholds: HealthThresholds::default(),
            start_time: Instant::now(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub async fn check_all(&self) -> AggregatedHealth {
        let (store, cache, lock) = tokio::join!(
            check_store(&self.pool, self.thresholds),
            check_cache(&self.cache_client, self.thresholds),
            check_lock(self.lock.as_ref(), self.thresholds),
        );

        AggregatedHealth::new(
            env!("CARGO_PKG_VERSION").to_string(),
            self.uptime_seconds(),
            vec![store, cache, lock],
        )
    }

    /// The coordinator cannot deduplicate without all three, so any
    /// unhealthy dependency makes the service not ready.
    pub async fn is_ready(&self) -> bool {
        !self.check_all().await.status.is_unhealthy()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Counts IN_PROGRESS records; a growing number points at crashed handlers
/// that need an operator.
pub async fn check_store(pool: &PgPool, thresholds: HealthThresholds) -> DependencyHealth {
    let started = Instant::now();
    let query = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM idempotency_records WHERE status = $1")
        .bind(IdempotencyStatus::InProgress.code())
        .fetch_one(pool);

    match tokio::time::timeout(thresholds.timeout, query).await {
        Ok(Ok(in_progress)) => DependencyHealth::measured("store", started, thresholds.store)
            .with_message(format!("{} records in progress", in_progress)),
        Ok(Err(e)) => DependencyHealth::failed("store", format!("query failed: {}", e)),
        Err(_) => DependencyHealth::failed("store", "query timed out"),
    }
}

pub async fn check_cache(client: &redis::Client, thresholds: HealthThresholds) -> DependencyHealth {
    let started = Instant::now();
    let ping = async {
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok::<_, redis::RedisError>(())
    };

    match tokio::time::timeout(thresholds.timeout, ping).await {
        Ok(Ok(())) => DependencyHealth::measured("cache", started, thresholds.cache),
        Ok(Err(e)) => DependencyHealth::failed("cache", format!("PING failed: {}", e)),
        Err(_) => DependencyHealth::failed("cache", "PING timed out"),
    }
}

/// Takes and releases a throwaway lock. A lock that is unexpectedly held
/// degrades; a backend error or a lost release is unhealthy.
pub async fn check_lock(lock: &dyn LockProvider, thresholds: HealthThresholds) -> DependencyHealth {
    let started = Instant::now();
    let name = format!("health:{}", Uuid::new_v4());
    let round_trip = async {
        let acquired = match lock.try_acquire(&name, thresholds.timeout).await? {
            Some(handle) => {
                lock.release(&handle).await?;
                true
            }
            None => false,
        };
        Ok::<_, AppError>(acquired)
    };

    match tokio::time::timeout(thresholds.timeout, round_trip).await {
        Ok(Ok(true)) => DependencyHealth::measured("lock", started, thresholds.lock),
        Ok(Ok(false)) => DependencyHealth {
            status: HealthStatus::Degraded,
            ..DependencyHealth::measured("lock", started, thresholds.lock)
        }
        .with_message(format!("fresh lock {} was already held", name)),
        Ok(Err(e)) => DependencyHealth::failed("lock", format!("round trip failed: {}", e)),
        Err(_) => DependencyHealth::failed("lock", "round trip timed out"),
    }
}
