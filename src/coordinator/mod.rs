//! The idempotent-execution protocol.
//!
//! For a complete key, [`Coordinator::execute`] takes the per-key lock and
//! then answers from the response cache, replays a stored result, rejects a
//! call whose record is still in progress, or runs the handler and records
//! its outcome. The lock is released on every path, including when the
//! caller drops the returned future or the handler panics.

pub mod executor;
mod guard;
pub mod metrics;

pub use executor::{Coordinator, CoordinatorBuilder};
pub use metrics::{IdempotencyMetrics, MetricsSnapshot};
