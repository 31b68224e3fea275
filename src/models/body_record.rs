use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Append-only audit row written once per completed attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BodyRecord {
    pub id: Option<i64>,
    /// Id of the owning [`crate::models::IdempotencyRecord`].
    pub idempotent_id: i64,
    pub request_param: Option<String>,
    /// Codec frame holding the attempt's value or error.
    pub response_body: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl BodyRecord {
    pub fn new(idempotent_id: i64, request_param: Option<String>, response_body: Vec<u8>) -> Self {
        Self {
            id: None,
            idempotent_id,
            request_param,
            response_body,
            created_at: Utc::now(),
        }
    }

    pub fn has_response(&self) -> bool {
        !self.response_body.is_empty()
    }
}
