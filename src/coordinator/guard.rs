use crate::lock::LockGuard;
use crate::models::{IdempotencyRecord, IdempotencyStatus};
use crate::observability::get_metrics;
use crate::store::IdempotencyStore;
use std::sync::Arc;

/// Cleanup owed by an in-flight execution.
///
/// Holds the operation lock and, once the key is claimed, the record with
/// the status it should end in. If the execution future is dropped (caller
/// timeout, task abort) or the handler panics before the record is settled,
/// dropping the guard schedules the status write and then the lock release on
/// the current runtime.
pub(crate) struct ExecutionGuard {
    lock: Option<LockGuard>,
    store: Arc<dyn IdempotencyStore>,
    claim: Option<(IdempotencyRecord, IdempotencyStatus)>,
}

impl ExecutionGuard {
    pub(crate) fn new(lock: LockGuard, store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            lock: Some(lock),
            store,
            claim: None,
        }
    }

    /// Records that the key is claimed. Until the handler reports back, an
    /// abandoned claim ends as FAILED so the operation can be retried.
    pub(crate) fn claim(&mut self, record: IdempotencyRecord) {
        self.claim = Some((record, IdempotencyStatus::Failed));
    }

    /// The handler finished; an abandoned claim now ends in `status`.
    pub(crate) fn resolve(&mut self, status: IdempotencyStatus) {
        if let Some((_, pending)) = self.claim.as_mut() {
            *pending = status;
        }
    }

    /// The status write was attempted; nothing is owed for the record.
    pub(crate) fn settle(&mut self) {
        self.claim = None;
    }

    /// Releases the lock on the normal path. Failures are logged.
    pub(crate) async fn release(mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        let name = lock.handle().map(|h| h.name.clone()).unwrap_or_default();
        if let Err(e) = lock.release().await {
            tracing::warn!(lock = %name, "Failed to release lock: {}", e);
        }
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        let claim = self.claim.take();
        let (provider, handle) = match self.lock.take() {
            Some(lock) => {
                let (provider, handle) = lock.into_parts();
                (Some(provider), handle)
            }
            None => (None, None),
        };
        if claim.is_none() && handle.is_none() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!("Execution abandoned outside a runtime; record and lock are left to expire");
            return;
        };

        get_metrics().record_execution("abandoned");
        let store = self.store.clone();
        runtime.spawn(async move {
            if let Some((mut record, status)) = claim {
                record.transition(status);
                match store.update_status(&record).await {
                    Ok(()) => tracing::warn!(
                        request_id = %record.request_id,
                        app_code = %record.app_code,
                        status = ?status,
                        "Execution abandoned; settled record"
                    ),
                    Err(e) => {
                        get_metrics().record_best_effort_failure("abandoned_update_status");
                        tracing::error!(
                            request_id = %record.request_id,
                            app_code = %record.app_code,
                            "Failed to settle abandoned record: {}",
                            e
                        );
                    }
                }
            }

            if let (Some(provider), Some(handle)) = (provider, handle) {
                if let Err(e) = provider.release(&handle).await {
                    tracing::warn!(lock = %handle.name, "Failed to release abandoned lock: {}", e);
                }
            }
        });
    }
}
