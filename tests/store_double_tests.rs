mod common;

use async_trait::async_trait;
use common::{unique_request_id, CallCounter, PaymentError, Receipt};
use idempotency_coordinator::cache::{InMemoryResponseCache, ResponseCache};
use idempotency_coordinator::coordinator::Coordinator;
use idempotency_coordinator::error::{AppError, ExecuteError, Result};
use idempotency_coordinator::lock::{InMemoryLockProvider, LockHandle, LockProvider};
use idempotency_coordinator::models::{BodyRecord, IdempotencyRecord, IdempotencyStatus, OperationDescriptor};
use idempotency_coordinator::store::{IdempotencyStore, InMemoryIdempotencyStore};
use mockall::mock;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

mock! {
    pub Store {}

    #[async_trait]
    impl IdempotencyStore for Store {
        async fn insert(&self, record: &IdempotencyRecord) -> Result<Option<i64>>;
        async fn insert_body(&self, body: &BodyRecord) -> Result<()>;
        async fn update_status(&self, record: &IdempotencyRecord) -> Result<()>;
        async fn query_by_key(&self, request_id: &str, app_code: &str) -> Result<Option<IdempotencyRecord>>;
        async fn latest_body(&self, idempotent_id: i64) -> Result<Option<BodyRecord>>;
    }
}

/// Cache whose every operation fails.
struct BrokenCache;

#[async_trait]
impl ResponseCache for BrokenCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(AppError::Internal(anyhow::anyhow!("cache offline")))
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<()> {
        Err(AppError::Internal(anyhow::anyhow!("cache offline")))
    }

    async fn invalidate(&self, _key: &str) -> Result<()> {
        Err(AppError::Internal(anyhow::anyhow!("cache offline")))
    }
}

/// Lock provider whose backend is unreachable.
struct UnreachableLock;

#[async_trait]
impl LockProvider for UnreachableLock {
    async fn try_acquire(&self, _name: &str, _lease_time: Duration) -> Result<Option<LockHandle>> {
        Err(AppError::Internal(anyhow::anyhow!("lock backend unreachable")))
    }

    async fn release(&self, _handle: &LockHandle) -> Result<()> {
        Err(AppError::Internal(anyhow::anyhow!("lock backend unreachable")))
    }
}

type CallResult = std::result::Result<Option<Receipt>, ExecuteError<PaymentError>>;

fn coordinator_with(store: Arc<dyn IdempotencyStore>, cache: Arc<dyn ResponseCache>) -> Coordinator {
    Coordinator::builder()
        .lock_provider(Arc::new(InMemoryLockProvider::new()))
        .cache(cache)
        .store(store)
        .build()
        .expect("Failed to build coordinator")
}

fn receipt(attempt: usize) -> Receipt {
    Receipt {
        order_id: "ord-mock".to_string(),
        amount_cents: 900,
        attempt,
    }
}

#[tokio::test]
async fn test_record_without_id_is_store_inconsistency() {
    let descriptor = OperationDescriptor::new(unique_request_id(), "PAY");
    let orphan = IdempotencyRecord::from_descriptor(&descriptor, IdempotencyStatus::Success);

    let mut store = MockStore::new();
    store
        .expect_query_by_key()
        .times(1)
        .returning(move |_, _| Ok(Some(orphan.clone())));
    store.expect_insert().never();
    store.expect_latest_body().never();

    let coordinator = coordinator_with(Arc::new(store), Arc::new(InMemoryResponseCache::new()));
    let counter = CallCounter::new();

    let result: CallResult = coordinator
        .execute(&descriptor, || async { Ok(receipt(counter.hit())) })
        .await;

    let err = assert_err!(result);
    assert!(matches!(
        err.idempotency_error(),
        Some(AppError::StoreInconsistency(_))
    ));
    assert_eq!(counter.count(), 0);
}

#[tokio::test]
async fn test_insert_without_id_aborts_before_handler() {
    let descriptor = OperationDescriptor::new(unique_request_id(), "PAY");

    let mut store = MockStore::new();
    store.expect_query_by_key().returning(|_, _| Ok(None));
    store
        .expect_insert()
        .withf(|record| record.status == IdempotencyStatus::InProgress)
        .times(1)
        .returning(|_| Ok(None));
    store.expect_update_status().never();
    store.expect_insert_body().never();

    let coordinator = coordinator_with(Arc::new(store), Arc::new(InMemoryResponseCache::new()));
    let counter = CallCounter::new();

    let result: CallResult = coordinator
        .execute(&descriptor, || async { Ok(receipt(counter.hit())) })
        .await;

    let err = assert_err!(result);
    assert!(matches!(
        err.idempotency_error(),
        Some(AppError::StoreInconsistency(_))
    ));
    assert_eq!(counter.count(), 0);
}

#[tokio::test]
async fn test_lookup_failure_propagates() {
    let descriptor = OperationDescriptor::new(unique_request_id(), "PAY");

    let mut store = MockStore::new();
    store
        .expect_query_by_key()
        .returning(|_, _| Err(AppError::Internal(anyhow::anyhow!("connection reset"))));

    let coordinator = coordinator_with(Arc::new(store), Arc::new(InMemoryResponseCache::new()));
    let counter = CallCounter::new();

    let result: CallResult = coordinator
        .execute(&descriptor, || async { Ok(receipt(counter.hit())) })
        .await;

    let err = assert_err!(result);
    assert!(!err.is_duplicate());
    assert!(err.handler_error().is_none());
    assert_eq!(counter.count(), 0);
}

#[tokio::test]
async fn test_success_path_writes_in_order() {
    let descriptor = OperationDescriptor::new(unique_request_id(), "PAY").with_request_param(&"ord-mock");
    let mut seq = mockall::Sequence::new();

    let mut store = MockStore::new();
    store
        .expect_query_by_key()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(None));
    store
        .expect_insert()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(Some(41)));
    store
        .expect_update_status()
        .withf(|record| record.id == Some(41) && record.status == IdempotencyStatus::Success)
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));
    store
        .expect_insert_body()
        .withf(|body| body.idempotent_id == 41 && body.request_param.as_deref() == Some("\"ord-mock\""))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));

    let coordinator = coordinator_with(Arc::new(store), Arc::new(InMemoryResponseCache::new()));

    let result: CallResult = coordinator.execute(&descriptor, || async { Ok(receipt(1)) }).await;
    assert_eq!(assert_ok!(result), Some(receipt(1)));
}

#[tokio::test]
async fn test_broken_cache_never_fails_the_call() {
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let coordinator = coordinator_with(store.clone(), Arc::new(BrokenCache));
    let counter = CallCounter::new();
    let descriptor = OperationDescriptor::new(unique_request_id(), "PAY");

    let first: CallResult = coordinator
        .execute(&descriptor, || async { Ok(receipt(counter.hit())) })
        .await;
    let second: CallResult = coordinator
        .execute(&descriptor, || async { Ok(receipt(counter.hit())) })
        .await;

    assert_eq!(assert_ok!(first), Some(receipt(1)));
    assert_eq!(assert_ok!(second), Some(receipt(1)));
    assert_eq!(counter.count(), 1);
    assert_eq!(store.query_count(), 2);
}

#[tokio::test]
async fn test_lock_backend_error_is_not_reported_as_duplicate() {
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let coordinator = Coordinator::builder()
        .lock_provider(Arc::new(UnreachableLock))
        .cache(Arc::new(InMemoryResponseCache::new()))
        .store(store.clone())
        .build()
        .expect("Failed to build coordinator");
    let counter = CallCounter::new();
    let descriptor = OperationDescriptor::new(unique_request_id(), "PAY").with_wait_time(Duration::from_secs(5));

    let started = std::time::Instant::now();
    let result: CallResult = coordinator
        .execute(&descriptor, || async { Ok(receipt(counter.hit())) })
        .await;

    let err = assert_err!(result);
    assert!(!err.is_duplicate());
    assert!(matches!(err.idempotency_error(), Some(AppError::Internal(_))));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(counter.count(), 0);
    assert_eq!(store.query_count(), 0);
    assert_eq!(coordinator.metrics().lock_rejections, 0);
}
