use crate::cache::ResponseCache;
use crate::codec::{self, Outcome};
use crate::config::IdempotencySettings;
use crate::coordinator::guard::ExecutionGuard;
use crate::coordinator::metrics::{IdempotencyMetrics, MetricsSnapshot};
use crate::error::{AppError, ExecuteError};
use crate::lock::{LockGuard, LockProvider};
use crate::models::{BodyRecord, IdempotencyRecord, IdempotencyStatus, OperationDescriptor};
use crate::observability::{get_metrics, mask_request_id, LatencyTimer};
use crate::store::IdempotencyStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

type ExecuteResult<T, E> = std::result::Result<Option<T>, ExecuteError<E>>;

/// Runs handlers at most once per operation key and replays their results
/// to duplicate callers.
pub struct Coordinator {
    lock: Arc<dyn LockProvider>,
    cache: Arc<dyn ResponseCache>,
    store: Option<Arc<dyn IdempotencyStore>>,
    settings: IdempotencySettings,
    metrics: Arc<IdempotencyMetrics>,
}

#[derive(Default)]
pub struct CoordinatorBuilder {
    lock: Option<Arc<dyn LockProvider>>,
    cache: Option<Arc<dyn ResponseCache>>,
    store: Option<Arc<dyn IdempotencyStore>>,
    settings: Option<IdempotencySettings>,
}

impl CoordinatorBuilder {
    pub fn lock_provider(mut self, lock: Arc<dyn LockProvider>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn store(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn settings(mut self, settings: IdempotencySettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// A coordinator without a store is valid and runs every handler
    /// directly.
    pub fn build(self) -> crate::error::Result<Coordinator> {
        let lock = self.lock.ok_or_else(|| missing("lock provider"))?;
        let cache = self.cache.ok_or_else(|| missing("response cache"))?;
        let settings = self.settings.unwrap_or_default();
        settings.validate()?;

        if self.store.is_none() {
            tracing::warn!("Coordinator built without an idempotency store; calls will not be deduplicated");
        }

        Ok(Coordinator {
            lock,
            cache,
            store: self.store,
            settings,
            metrics: Arc::new(IdempotencyMetrics::new()),
        })
    }
}

fn missing(what: &str) -> AppError {
    AppError::Config(config::ConfigError::Message(format!(
        "coordinator requires a {}",
        what
    )))
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::default()
    }

    pub fn settings(&self) -> &IdempotencySettings {
        &self.settings
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Runs `handler` under idempotency protection for the descriptor's key.
    ///
    /// Returns `Ok(Some(v))` for a fresh or replayed value, `Ok(None)` when a
    /// successful record has no recorded response, and
    /// `Err(ExecuteError::Handler(e))` for a fresh or replayed handler error.
    pub async fn execute<T, E, F, Fut>(&self, descriptor: &OperationDescriptor, handler: F) -> ExecuteResult<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        E: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
    {
        self.metrics.record_request();

        let store = match &self.store {
            Some(store) if descriptor.key.is_complete() => store.clone(),
            Some(_) => {
                tracing::warn!(
                    request_id = %descriptor.request_id(),
                    app_code = %descriptor.app_code(),
                    "Incomplete operation key, running handler without idempotency"
                );
                return self.run_unguarded(handler).await;
            }
            None => {
                tracing::warn!(key = %descriptor.key, "No idempotency store configured, running handler directly");
                return self.run_unguarded(handler).await;
            }
        };

        let name = descriptor.key.qualified(self.settings.key_prefix());
        let wait_time = descriptor.wait_time.unwrap_or_else(|| self.settings.default_wait());
        let lease_time = descriptor.lease_time.unwrap_or_else(|| self.settings.default_lease());

        let timer = LatencyTimer::new();
        let lock = match LockGuard::acquire(self.lock.clone(), &name, wait_time, lease_time).await {
            Ok(lock) => {
                get_metrics().record_lock_acquisition(true, timer.elapsed_ms());
                lock
            }
            Err(e) => {
                get_metrics().record_lock_acquisition(false, timer.elapsed_ms());
                if matches!(e, AppError::LockUnavailable { .. }) {
                    self.metrics.record_lock_rejection();
                    get_metrics().record_execution("lock_rejected");
                } else {
                    get_metrics().record_execution("lock_error");
                    tracing::error!(lock = %name, "Lock provider failed, handler not run: {}", e);
                }
                return Err(e.into());
            }
        };

        let mut guard = ExecutionGuard::new(lock, store.clone());
        let result = self
            .execute_locked(descriptor, &name, store.as_ref(), &mut guard, handler)
            .await;
        guard.release().await;

        result
    }

    async fn run_unguarded<T, E, F, Fut>(&self, handler: F) -> ExecuteResult<T, E>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
    {
        self.metrics.record_fail_open();
        get_metrics().record_execution("fail_open");
        handler().await.map(Some).map_err(ExecuteError::Handler)
    }

    async fn execute_locked<T, E, F, Fut>(
        &self,
        descriptor: &OperationDescriptor,
        cache_key: &str,
        store: &dyn IdempotencyStore,
        guard: &mut ExecutionGuard,
        handler: F,
    ) -> ExecuteResult<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        E: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
    {
        if let Some(outcome) = self.cached_outcome::<T, E>(cache_key).await {
            self.metrics.record_cache_hit();
            get_metrics().record_execution("cache_hit");
            tracing::debug!(key = %descriptor.key, error = outcome.is_error(), "Replaying cached response");
            return replay(outcome);
        }

        let existing = store
            .query_by_key(descriptor.request_id(), descriptor.app_code())
            .await?;

        match existing {
            Some(record) if record.id.is_none() => Err(AppError::StoreInconsistency(format!(
                "record for {} has no id",
                descriptor.key
            ))
            .into()),
            Some(record) if !record.status.allows_execution() => {
                if record.is_in_progress() {
                    self.metrics.record_in_progress_rejection();
                    get_metrics().record_execution("in_progress");
                    tracing::info!(key = %descriptor.key, "Request is already being processed");
                    return Err(AppError::RequestInProgress {
                        key: descriptor.key.to_string(),
                    }
                    .into());
                }
                self.replay_from_store(descriptor, store, &record).await
            }
            existing => {
                self.run_and_record(descriptor, cache_key, store, guard, existing, handler)
                    .await
            }
        }
    }

    /// Reads the fast-path entry. Read failures and undecodable entries
    /// count as misses.
    async fn cached_outcome<T, E>(&self, cache_key: &str) -> Option<Outcome<T, E>>
    where
        T: DeserializeOwned,
        E: DeserializeOwned,
    {
        let bytes = match self.cache.get(cache_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                get_metrics().record_cache_lookup(false);
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %cache_key, "Cache read failed, falling back to store: {}", e);
                get_metrics().record_cache_lookup(false);
                return None;
            }
        };

        match codec::decode::<T, E>(&bytes) {
            Ok(outcome) => {
                get_metrics().record_cache_lookup(true);
                Some(outcome)
            }
            Err(e) => {
                tracing::warn!(key = %cache_key, "Ignoring undecodable cache entry: {}", e);
                get_metrics().record_cache_lookup(false);
                None
            }
        }
    }

    async fn replay_from_store<T, E>(
        &self,
        descriptor: &OperationDescriptor,
        store: &dyn IdempotencyStore,
        record: &IdempotencyRecord,
    ) -> ExecuteResult<T, E>
    where
        T: DeserializeOwned,
        E: DeserializeOwned,
    {
        let id = record_id(record)?;
        self.metrics.record_store_replay();
        get_metrics().record_execution("store_replay");

        let body = match store.latest_body(id).await? {
            Some(body) if body.has_response() => body,
            _ => {
                tracing::warn!(
                    request_id = %mask_request_id(descriptor.request_id()),
                    app_code = %descriptor.app_code(),
                    "Successful record has no recorded response"
                );
                return Ok(None);
            }
        };

        let outcome = codec::decode::<T, E>(&body.response_body).map_err(AppError::from)?;
        tracing::debug!(key = %descriptor.key, error = outcome.is_error(), "Replaying stored response");
        replay(outcome)
    }

    async fn run_and_record<T, E, F, Fut>(
        &self,
        descriptor: &OperationDescriptor,
        cache_key: &str,
        store: &dyn IdempotencyStore,
        guard: &mut ExecutionGuard,
        existing: Option<IdempotencyRecord>,
        handler: F,
    ) -> ExecuteResult<T, E>
    where
        T: Serialize + Send,
        E: Serialize + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
    {
        let record = self.mark_in_progress(descriptor, store, existing).await?;
        record_id(&record)?;
        guard.claim(record.clone());

        self.metrics.record_execution();
        let timer = LatencyTimer::new();
        let result = handler().await;
        get_metrics().record_handler_latency(timer.elapsed_ms(), result.is_ok());
        guard.resolve(if result.is_ok() {
            IdempotencyStatus::Success
        } else {
            IdempotencyStatus::Failed
        });

        match result {
            Ok(value) => {
                get_metrics().record_execution("executed");
                let encoded = codec::encode_value(&value);
                if let Err(e) = &encoded {
                    tracing::error!(key = %descriptor.key, "Failed to encode handler result: {}", e);
                }

                if let Ok(bytes) = &encoded {
                    if let Err(e) = self.cache.set(cache_key, bytes, self.settings.cache_ttl()).await {
                        get_metrics().record_best_effort_failure("cache_set");
                        tracing::warn!(key = %cache_key, "Failed to cache response: {}", e);
                    }
                }

                self.finish(descriptor, store, record, IdempotencyStatus::Success, encoded.ok())
                    .await;
                guard.settle();
                Ok(Some(value))
            }
            Err(error) => {
                self.metrics.record_handler_failure();
                get_metrics().record_execution("handler_failed");
                let encoded = codec::encode_error(&error);
                if let Err(e) = &encoded {
                    tracing::error!(key = %descriptor.key, "Failed to encode handler error: {}", e);
                }

                self.finish(descriptor, store, record, IdempotencyStatus::Failed, encoded.ok())
                    .await;
                guard.settle();
                Err(ExecuteError::Handler(error))
            }
        }
    }

    /// Claims the key in the store before the handler runs. A failure here
    /// aborts the call.
    async fn mark_in_progress(
        &self,
        descriptor: &OperationDescriptor,
        store: &dyn IdempotencyStore,
        existing: Option<IdempotencyRecord>,
    ) -> crate::error::Result<IdempotencyRecord> {
        match existing {
            Some(mut record) => {
                record.transition(IdempotencyStatus::InProgress);
                store.update_status(&record).await?;
                tracing::debug!(key = %descriptor.key, id = ?record.id, "Retrying failed operation");
                Ok(record)
            }
            None => {
                let mut record = IdempotencyRecord::from_descriptor(descriptor, IdempotencyStatus::InProgress);
                let id = store.insert(&record).await?.ok_or_else(|| {
                    AppError::StoreInconsistency(format!("store returned no id for {}", descriptor.key))
                })?;
                record.id = Some(id);
                Ok(record)
            }
        }
    }

    /// Post-handler writes. Failures are logged and never reach the caller.
    async fn finish(
        &self,
        descriptor: &OperationDescriptor,
        store: &dyn IdempotencyStore,
        mut record: IdempotencyRecord,
        status: IdempotencyStatus,
        encoded: Option<Vec<u8>>,
    ) {
        record.transition(status);
        if let Err(e) = store.update_status(&record).await {
            get_metrics().record_best_effort_failure("update_status");
            tracing::error!(
                key = %descriptor.key,
                status = ?status,
                "Failed to record operation status: {}",
                e
            );
        }

        let (Some(id), Some(bytes)) = (record.id, encoded) else {
            return;
        };

        let body = BodyRecord::new(id, descriptor.request_param.clone(), bytes);
        if let Err(e) = store.insert_body(&body).await {
            get_metrics().record_best_effort_failure("insert_body");
            tracing::error!(key = %descriptor.key, "Failed to record response body: {}", e);
        }
    }
}

fn record_id(record: &IdempotencyRecord) -> crate::error::Result<i64> {
    record.id.ok_or_else(|| {
        AppError::StoreInconsistency(format!(
            "record for {}:{} has no id",
            record.request_id, record.app_code
        ))
    })
}

fn replay<T, E>(outcome: Outcome<T, E>) -> ExecuteResult<T, E> {
    match outcome {
        Outcome::Value(value) => Ok(Some(value)),
        Outcome::Error(error) => Err(ExecuteError::Handler(error)),
    }
}
