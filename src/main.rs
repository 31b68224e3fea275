use idempotency_coordinator::cache::RedisResponseCache;
use idempotency_coordinator::config::Settings;
use idempotency_coordinator::coordinator::Coordinator;
use idempotency_coordinator::error::AppError;
use idempotency_coordinator::lock::{LockProvider, RedisLockProvider};
use idempotency_coordinator::observability::{init_logging, init_metrics, HealthChecker, LogConfig};
use idempotency_coordinator::store::{PostgresIdempotencyStore, RetentionJob};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let settings = Settings::new()?;
    init_logging(&LogConfig::from_settings(&settings.application));
    info!("Configuration loaded");

    let _metrics = init_metrics()?;
    info!("Metrics recorder installed");

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.pool_size)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&settings.database.url)
        .await
        .map_err(AppError::Database)?;
    info!("Database connection established");

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations applied successfully");

    info!("Connecting to Redis...");
    let client = redis::Client::open(settings.redis.url.as_str()).map_err(AppError::Redis)?;
    let mut con = client
        .get_multiplexed_async_connection()
        .await
        .map_err(AppError::Redis)?;
    let _: () = redis::cmd("PING")
        .query_async(&mut con)
        .await
        .map_err(AppError::Redis)?;
    info!("Redis connection established");

    let lock: Arc<dyn LockProvider> = Arc::new(
        RedisLockProvider::new(client.clone()).with_retry_policy(settings.idempotency.retry_policy()),
    );

    let health = HealthChecker::new(pool.clone(), client.clone(), lock.clone())
        .check_all()
        .await;
    for dependency in &health.dependencies {
        info!(
            dependency = %dependency.name,
            status = ?dependency.status,
            latency_ms = ?dependency.latency_ms,
            message = ?dependency.message,
            "Dependency checked"
        );
    }
    if health.status.is_unhealthy() {
        return Err("a required dependency is unhealthy".into());
    }

    let store = PostgresIdempotencyStore::new(pool);
    let cache = Arc::new(RedisResponseCache::new(client));
    let coordinator = Coordinator::builder()
        .lock_provider(lock.clone())
        .cache(cache.clone())
        .store(Arc::new(store.clone()))
        .settings(settings.idempotency.clone())
        .build()?;
    info!(
        key_prefix = ?coordinator.settings().key_prefix(),
        cache_ttl_secs = coordinator.settings().cache_ttl_secs,
        "Coordinator ready"
    );

    let retention = RetentionJob::new(
        store,
        settings.idempotency.retention_days,
        settings.idempotency.retention_interval(),
    )
    .with_lock_provider(lock)
    .start();
    info!(
        retention_days = settings.idempotency.retention_days,
        "Retention job started"
    );

    info!("System startup verification complete: all services healthy");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    retention.abort();

    let snapshot = coordinator.metrics();
    info!(
        total_requests = snapshot.total_requests,
        executions = snapshot.executions,
        replay_rate = snapshot.replay_rate(),
        duplicate_rejections = snapshot.duplicate_rejections(),
        cache_hit_rate = cache.stats().hit_rate(),
        "Coordinator stopped"
    );

    Ok(())
}
