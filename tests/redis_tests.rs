mod common;

use common::unique_request_id;
use idempotency_coordinator::cache::{RedisResponseCache, ResponseCache};
use idempotency_coordinator::error::AppError;
use idempotency_coordinator::lock::{LockProvider, RedisLockProvider};
use std::time::Duration;

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_lock_excludes_second_holder() {
    let provider = RedisLockProvider::new(common::redis_client());
    let name = format!("{}:APP", unique_request_id());

    let held = provider
        .acquire(&name, Duration::ZERO, Duration::from_secs(5))
        .await
        .expect("Failed to acquire lock");

    let err = provider
        .acquire(&name, Duration::from_millis(50), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::LockUnavailable { .. }));

    provider.release(&held).await.expect("Failed to release lock");

    let again = provider
        .acquire(&name, Duration::ZERO, Duration::from_secs(5))
        .await
        .expect("Lock should be free after release");
    provider.release(&again).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_lock_stale_release_is_lost() {
    let provider = RedisLockProvider::new(common::redis_client());
    let name = format!("{}:APP", unique_request_id());

    let first = provider
        .acquire(&name, Duration::ZERO, Duration::from_millis(50))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    let second = provider
        .acquire(&name, Duration::ZERO, Duration::from_secs(5))
        .await
        .expect("Expired lease should be free");

    let err = provider.release(&first).await.unwrap_err();
    assert!(matches!(err, AppError::LockLost { .. }));

    provider.release(&second).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_cache_set_get_invalidate() {
    let cache = RedisResponseCache::new(common::redis_client());
    let key = format!("{}:APP", unique_request_id());

    assert_eq!(cache.get(&key).await.unwrap(), None);

    cache
        .set(&key, b"frame", Duration::from_secs(30))
        .await
        .expect("Failed to set");
    assert_eq!(cache.get(&key).await.unwrap(), Some(b"frame".to_vec()));

    cache.invalidate(&key).await.expect("Failed to invalidate");
    assert_eq!(cache.get(&key).await.unwrap(), None);

    let stats = cache.stats().snapshot();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
}
