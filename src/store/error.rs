//! Session store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store errors.
///
/// Every variant forces the connection that produced it to be closed
/// rather than returned to the pool.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store unreachable or connection refused.
    #[error("Connection error: {0}")]
    Connect(String),

    /// Credential rejected.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Operation-level failure.
    #[error("Command error: {0}")]
    Command(String),

    /// Connect or command exceeded its deadline.
    #[error("Operation timed out")]
    Timeout,

    /// The pool is shutting down.
    #[error("Connection pool closed")]
    PoolClosed,
}

impl StoreError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Connect(_) => "connect",
            StoreError::Auth(_) => "auth",
            StoreError::Command(_) => "command",
            StoreError::Timeout => "timeout",
            StoreError::PoolClosed => "pool_closed",
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            StoreError::Connect(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}
