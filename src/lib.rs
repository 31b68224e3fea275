pub mod cache;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod models;
pub mod observability;
pub mod store;

pub use coordinator::Coordinator;
pub use error::{AppError, ExecuteError};
pub use models::{OperationDescriptor, OperationKey};
