use crate::codec::CodecError;
use thiserror::Error;

/// Crate-wide error type for the coordinator and its collaborators.
#[derive(Debug, Error)]
pub enum AppError {
    /// The per-key lock could not be acquired within the wait window.
    #[error("Request is a duplicate: lock '{key}' is held by another caller")]
    LockUnavailable { key: String },

    /// A record for the key is still being executed by another caller.
    #[error("Request '{key}' is currently being processed")]
    RequestInProgress { key: String },

    /// The store returned a record without an id.
    #[error("Idempotency store inconsistency: {0}")]
    StoreInconsistency(String),

    /// The lock lease expired and was taken over before release.
    #[error("Lock '{key}' was lost before release")]
    LockLost { key: String },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[source] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Returns true for the errors a caller should treat as "duplicate request".
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            AppError::LockUnavailable { .. } | AppError::RequestInProgress { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Error returned by [`crate::coordinator::Coordinator::execute`].
///
/// Handler errors are carried unchanged in `Handler`; everything raised by the
/// idempotency machinery itself is wrapped in `Idempotency`.
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    #[error(transparent)]
    Idempotency(AppError),

    #[error("Handler failed: {0}")]
    Handler(E),
}

impl<E> ExecuteError<E> {
    pub fn is_duplicate(&self) -> bool {
        match self {
            ExecuteError::Idempotency(e) => e.is_duplicate(),
            ExecuteError::Handler(_) => false,
        }
    }

    pub fn handler_error(&self) -> Option<&E> {
        match self {
            ExecuteError::Handler(e) => Some(e),
            ExecuteError::Idempotency(_) => None,
        }
    }

    pub fn into_handler_error(self) -> Option<E> {
        match self {
            ExecuteError::Handler(e) => Some(e),
            ExecuteError::Idempotency(_) => None,
        }
    }

    pub fn idempotency_error(&self) -> Option<&AppError> {
        match self {
            ExecuteError::Idempotency(e) => Some(e),
            ExecuteError::Handler(_) => None,
        }
    }
}

impl<E> From<AppError> for ExecuteError<E> {
    fn from(err: AppError) -> Self {
        ExecuteError::Idempotency(err)
    }
}
