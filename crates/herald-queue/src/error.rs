//! Error types for the event queue.

use std::time::Duration;

use herald_db::DbError;
use rusqlite::ErrorCode;

/// Errors that can occur during queue operations.
///
/// An empty queue is never an error: reads of an unknown or drained
/// destination return zero counts and empty batches.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The backend could not complete the operation (I/O failure, lock
    /// contention, exhausted pool). Safe to retry.
    #[error("queue backend unavailable: {0}")]
    BackendUnavailable(#[source] rusqlite::Error),

    /// A write violated a table constraint. Retrying the same write will
    /// fail the same way.
    #[error("queue constraint violation: {0}")]
    ConstraintViolation(#[source] rusqlite::Error),

    /// No pooled connection was available.
    #[error("queue connection pool unavailable: {0}")]
    PoolUnavailable(#[source] r2d2::Error),

    /// The caller's deadline expired before the backend call finished.
    #[error("queue operation exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    /// The blocking task running the operation was cancelled.
    #[error("queue task failed: {0}")]
    TaskFailed(String),

    /// The destination identifier was empty.
    #[error("destination id must not be empty")]
    InvalidDestination,

    /// The event is missing a required field or carries malformed content.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// A batch read asked for zero events.
    #[error("batch limit must be at least 1")]
    InvalidLimit,

    /// Stored content could not be parsed back into JSON.
    #[error("queued event content is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_)
                | Self::PoolUnavailable(_)
                | Self::DeadlineExceeded(_)
                | Self::TaskFailed(_)
        )
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Self::ConstraintViolation(e),
            _ => Self::BackendUnavailable(e),
        }
    }
}

impl From<DbError> for QueueError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Pool(e) => Self::PoolUnavailable(e),
            DbError::DeadlineExceeded(limit) => Self::DeadlineExceeded(limit),
            DbError::TaskFailed(reason) => Self::TaskFailed(reason),
        }
    }
}
