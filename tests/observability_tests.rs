mod common;

use async_trait::async_trait;
use idempotency_coordinator::config::ApplicationSettings;
use idempotency_coordinator::error::{AppError, Result};
use idempotency_coordinator::lock::{InMemoryLockProvider, LockHandle, LockProvider};
use idempotency_coordinator::observability::{
    check_lock, get_metrics, mask_request_id, mask_sensitive, AggregatedHealth, HealthChecker, HealthStatus,
    HealthThresholds, LatencyTimer, LogConfig, LogFormat,
};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_log_config_follows_application_settings() {
    let compact = LogConfig::from_settings(&ApplicationSettings {
        log_level: "warn".to_string(),
        log_format: "COMPACT".to_string(),
    });
    assert_eq!(compact.level, "warn");
    assert_eq!(compact.format, LogFormat::Compact);

    let fallback = LogConfig::from_settings(&ApplicationSettings {
        log_level: "info".to_string(),
        log_format: "yaml".to_string(),
    });
    assert_eq!(fallback.format, LogFormat::Pretty);
    assert!(!fallback.include_file);
}

#[test]
fn test_request_ids_are_masked() {
    let masked = mask_request_id("7f3c9a10-payment-0042");
    assert_eq!(masked.len(), "7f3c9a10-payment-0042".len());
    assert!(masked.starts_with("7f3c"));
    assert!(masked.ends_with("0042"));
    assert!(!masked.contains("payment"));

    assert_eq!(mask_sensitive("12345678", 4), "********");
}

#[test]
fn test_coordinator_metrics_record_without_recorder() {
    let metrics = get_metrics();
    for outcome in ["executed", "cache_hit", "store_replay", "in_progress", "lock_rejected", "fail_open"] {
        metrics.record_execution(outcome);
    }
    metrics.record_cache_lookup(false);
    metrics.record_lock_acquisition(true, 0.4);
    metrics.record_handler_latency(12.0, false);
    metrics.record_purged_records(3);
    metrics.set_in_progress_records(1);
    metrics.record_db_query("query_by_key", 2.0, true);
    metrics.record_redis_operation("get", 0.5, false);
}

#[test]
fn test_latency_timer_measures_sleep() {
    let timer = LatencyTimer::new();
    std::thread::sleep(std::time::Duration::from_millis(5));
    assert!(timer.elapsed_ms() >= 5.0);
}

/// Lock backend that refuses every call.
struct RefusingLock;

#[async_trait]
impl LockProvider for RefusingLock {
    async fn try_acquire(&self, _name: &str, _lease_time: Duration) -> Result<Option<LockHandle>> {
        Err(AppError::Internal(anyhow::anyhow!("Connection refused")))
    }

    async fn release(&self, _handle: &LockHandle) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_lock_round_trip_is_healthy() {
    let lock = InMemoryLockProvider::new();

    let health = check_lock(&lock, HealthThresholds::default()).await;

    assert_eq!(health.name, "lock");
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(health.latency_ms.is_some());
}

#[tokio::test]
async fn test_lock_backend_outage_is_unhealthy() {
    let lock = check_lock(&RefusingLock, HealthThresholds::default()).await;
    assert_eq!(lock.status, HealthStatus::Unhealthy);

    let health = AggregatedHealth::new("0.1.0".to_string(), 12, vec![lock]);
    assert_eq!(health.status, HealthStatus::Unhealthy);
    let json = serde_json::to_string(&health).unwrap();
    assert!(json.contains("\"status\":\"unhealthy\""));
    assert!(json.contains("Connection refused"));
}

#[tokio::test]
async fn test_slow_lock_backend_is_degraded() {
    let thresholds = HealthThresholds {
        lock: Duration::ZERO,
        ..Default::default()
    };
    let lock = InMemoryLockProvider::new();

    let health = check_lock(&lock, thresholds).await;

    assert!(health.status.is_degraded());
    assert!(!health.status.is_unhealthy());
}

#[tokio::test]
#[ignore = "requires PostgreSQL and Redis"]
async fn test_live_health_check() {
    let pool = common::setup_test_db().await;
    let checker = HealthChecker::new(pool, common::redis_client(), Arc::new(InMemoryLockProvider::new()));

    let health = checker.check_all().await;
    assert_eq!(health.dependencies.len(), 3);
    assert!(!health.status.is_unhealthy());
    let store = &health.dependencies[0];
    assert!(store.message.as_deref().unwrap_or_default().contains("records in progress"));
    assert!(checker.is_ready().await);
}
