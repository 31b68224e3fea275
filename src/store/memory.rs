use crate::error::{AppError, Result};
use crate::models::{BodyRecord, IdempotencyRecord};
use crate::store::IdempotencyStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// In-memory store for single-process deployments and tests.
///
/// Write failures can be switched on to exercise the coordinator's
/// best-effort paths.
pub struct InMemoryIdempotencyStore {
    records: RwLock<HashMap<i64, IdempotencyRecord>>,
    bodies: RwLock<Vec<BodyRecord>>,
    next_id: AtomicI64,
    queries: AtomicUsize,
    fail_on_insert_body: RwLock<bool>,
    fail_on_update_status: RwLock<bool>,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            bodies: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            queries: AtomicUsize::new(0),
            fail_on_insert_body: RwLock::new(false),
            fail_on_update_status: RwLock::new(false),
        }
    }
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_insert_body(&self, fail: bool) {
        *self.fail_on_insert_body.write().await = fail;
    }

    pub async fn set_fail_on_update_status(&self, fail: bool) {
        *self.fail_on_update_status.write().await = fail;
    }

    /// Number of `query_by_key` calls served.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn bodies_for(&self, idempotent_id: i64) -> Vec<BodyRecord> {
        self.bodies
            .read()
            .await
            .iter()
            .filter(|b| b.idempotent_id == idempotent_id)
            .cloned()
            .collect()
    }

    pub async fn body_count(&self) -> usize {
        self.bodies.read().await.len()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn insert(&self, record: &IdempotencyRecord) -> Result<Option<i64>> {
        let mut records = self.records.write().await;
        let duplicate = records
            .values()
            .any(|r| r.request_id == record.request_id && r.app_code == record.app_code);
        if duplicate {
            return Err(AppError::Validation(format!(
                "Record for {}:{} already exists",
                record.request_id, record.app_code
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = record.clone();
        stored.id = Some(id);
        records.insert(id, stored);
        Ok(Some(id))
    }

    async fn insert_body(&self, body: &BodyRecord) -> Result<()> {
        if *self.fail_on_insert_body.read().await {
            return Err(AppError::Internal(anyhow::anyhow!("body insert disabled")));
        }

        let mut bodies = self.bodies.write().await;
        let mut stored = body.clone();
        stored.id = Some(bodies.len() as i64 + 1);
        bodies.push(stored);
        Ok(())
    }

    async fn update_status(&self, record: &IdempotencyRecord) -> Result<()> {
        if *self.fail_on_update_status.read().await {
            return Err(AppError::Internal(anyhow::anyhow!("status update disabled")));
        }

        let id = record
            .id
            .ok_or_else(|| AppError::StoreInconsistency("cannot update unsaved record".to_string()))?;

        let mut records = self.records.write().await;
        let stored = records
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Idempotency record {} not found", id)))?;
        stored.status = record.status;
        stored.updated_at = record.updated_at;
        Ok(())
    }

    async fn query_by_key(&self, request_id: &str, app_code: &str) -> Result<Option<IdempotencyRecord>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.request_id == request_id && r.app_code == app_code)
            .cloned())
    }

    async fn latest_body(&self, idempotent_id: i64) -> Result<Option<BodyRecord>> {
        // Bodies are append-only, so the last match is the newest.
        Ok(self
            .bodies
            .read()
            .await
            .iter()
            .rev()
            .find(|b| b.idempotent_id == idempotent_id)
            .cloned())
    }
}
