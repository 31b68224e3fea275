pub mod memory;
pub mod postgres;
pub mod retention;

pub use memory::InMemoryIdempotencyStore;
pub use postgres::PostgresIdempotencyStore;
pub use retention::{RetentionJob, RETENTION_LOCK};

use crate::error::Result;
use crate::models::{BodyRecord, IdempotencyRecord};
use async_trait::async_trait;

/// Durable home of idempotency records and their response bodies.
///
/// Implementations must be safe for concurrent use on different keys; the
/// coordinator's lock only serializes access per key.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Persists a new record and returns the id the store assigned.
    async fn insert(&self, record: &IdempotencyRecord) -> Result<Option<i64>>;

    /// Appends a body row for a completed attempt.
    async fn insert_body(&self, body: &BodyRecord) -> Result<()>;

    /// Writes the record's status (looked up by `record.id`).
    async fn update_status(&self, record: &IdempotencyRecord) -> Result<()>;

    async fn query_by_key(&self, request_id: &str, app_code: &str) -> Result<Option<IdempotencyRecord>>;

    /// Most recent body for a record, if any.
    async fn latest_body(&self, idempotent_id: i64) -> Result<Option<BodyRecord>>;
}
