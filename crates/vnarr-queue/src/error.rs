//! Queue error types.

use thiserror::Error;

use vnarr_models::JobId;

/// Sentinel returned when admission is refused for lack of capacity.
pub const QUEUE_FULL: &str = "QUEUE_FULL";

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Every slot is taken. Displays as [`QUEUE_FULL`].
    #[error("QUEUE_FULL")]
    QueueFull { max_concurrent: usize },

    #[error("Job {0} is already running")]
    AlreadyRunning(JobId),

    #[error("Admission queue closed")]
    Closed,
}

impl QueueError {
    /// True for the capacity sentinel, so callers can delete the rejected
    /// job instead of treating this as a generic failure.
    pub fn is_queue_full(&self) -> bool {
        matches!(self, QueueError::QueueFull { .. })
    }
}
