pub mod body_record;
pub mod descriptor;
pub mod idempotency_record;

pub use body_record::BodyRecord;
pub use descriptor::{OperationDescriptor, OperationKey, DEFAULT_LEASE_TIME, DEFAULT_WAIT_TIME};
pub use idempotency_record::{IdempotencyRecord, IdempotencyStatus};
