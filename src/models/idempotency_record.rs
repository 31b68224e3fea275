use crate::models::OperationDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of an idempotent operation.
///
/// Persisted as a small integer: `0` in progress, `1` success, `2` failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    /// An attempt is executing and has not resolved yet.
    InProgress = 0,
    /// The handler completed; its result is replayable.
    Success = 1,
    /// The last attempt failed; a retry may execute again.
    Failed = 2,
}

impl IdempotencyStatus {
    pub fn code(&self) -> i16 {
        *self as i16
    }

    /// Returns true if a new attempt may run the handler.
    pub fn allows_execution(&self) -> bool {
        matches!(self, IdempotencyStatus::Failed)
    }
}

/// Persisted record of one logical operation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IdempotencyRecord {
    /// Assigned by the store on insert.
    pub id: Option<i64>,
    pub request_id: String,
    pub app_code: String,
    pub business_no: Option<String>,
    pub business_type: Option<String>,
    pub request_desc: Option<String>,
    pub business_desc: Option<String>,
    pub status: IdempotencyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Builds an unsaved record from a descriptor.
    pub fn from_descriptor(descriptor: &OperationDescriptor, status: IdempotencyStatus) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            request_id: descriptor.key.request_id.clone(),
            app_code: descriptor.key.app_code.clone(),
            business_no: descriptor.business_no.clone(),
            business_type: descriptor.business_type.clone(),
            request_desc: descriptor.request_desc.clone(),
            business_desc: descriptor.business_desc.clone(),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the record to a new status, stamping `updated_at`.
    pub fn transition(&mut self, status: IdempotencyStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn is_success(&self) -> bool {
        self.status == IdempotencyStatus::Success
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == IdempotencyStatus::InProgress
    }
}
