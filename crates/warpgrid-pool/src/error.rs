//! Error types for the connection pool.

use thiserror::Error;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by [`Pool`](crate::Pool) operations.
///
/// None of these are fatal to the pool itself: callers back off and retry
/// on `Exhausted`, `DialFailed` and `OpenFailed`, and `QueueFull` only means
/// the returned connection was discarded.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Admission control rejected a new dial: `used` would exceed `max`.
    #[error("connection pool exhausted, used:{used}/{max}")]
    Exhausted { used: usize, max: usize },

    /// The endpoint could not be resolved or the dial timed out.
    #[error("dial {endpoint} failed: {reason}")]
    DialFailed { endpoint: String, reason: String },

    /// The transport could not be opened to the endpoint.
    #[error("open {endpoint} failed: {reason}")]
    OpenFailed { endpoint: String, reason: String },

    /// A returned connection found no room in the free queue and was closed.
    #[error("free queue full, used:{used}, init:{init}, idle:{idle}")]
    QueueFull { used: usize, init: usize, idle: usize },

    /// The pool has been shut down; no new leases are handed out.
    #[error("connection pool is closed")]
    Closed,

    /// Closing the underlying transport failed.
    #[error("close connection: {0}")]
    Close(#[from] std::io::Error),
}

impl PoolError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::Exhausted { .. } | PoolError::DialFailed { .. } | PoolError::OpenFailed { .. }
        )
    }
}
