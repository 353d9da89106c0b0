//! Worker error types.

use std::time::Duration;

use thiserror::Error;

use vnarr_models::timestamp::TimestampError;
use vnarr_models::{SceneId, SpecError, SubStepId};

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Message persisted on a job stopped through its cancellation signal.
pub const STOPPED_BY_USER: &str = "stopped by user";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("stopped by user")]
    Cancelled,

    #[error("step {step} timed out after {}s without finishing", .limit.as_secs())]
    StepTimedOut { step: String, limit: Duration },

    #[error("{failed} of {total} scenes failed at {sub_step}: {first_error}")]
    ScenesFailed {
        sub_step: SubStepId,
        failed: usize,
        total: usize,
        first_error: String,
    },

    #[error("scene {scene_id}: {message}")]
    Scene { scene_id: SceneId, message: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("Run state error: {0}")]
    State(String),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Timestamp(#[from] TimestampError),

    #[error("Media error: {0}")]
    Media(#[from] vnarr_media::MediaError),

    #[error("Storage error: {0}")]
    Store(#[from] vnarr_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] vnarr_queue::QueueError),

    #[error(transparent)]
    Ai(#[from] vnarr_ai::AiError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Cancellation observed at any layer.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            WorkerError::Cancelled | WorkerError::Media(vnarr_media::MediaError::Cancelled)
        )
    }

    /// Admission was refused for lack of capacity.
    pub fn is_queue_full(&self) -> bool {
        matches!(self, WorkerError::Queue(err) if err.is_queue_full())
    }

    /// The stuck-step watchdog fired; the job is failed without retrying.
    pub fn is_watchdog(&self) -> bool {
        matches!(self, WorkerError::StepTimedOut { .. })
    }

    /// Captured stderr of the media binary, if the failure came from one.
    pub fn stderr_tail(&self) -> Option<&str> {
        match self {
            WorkerError::Media(err) => err.stderr(),
            _ => None,
        }
    }

    /// This error and each of its sources, outermost first.
    pub fn chain(&self) -> Vec<String> {
        let mut chain = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            let message = err.to_string();
            if chain.last() != Some(&message) {
                chain.push(message);
            }
            source = err.source();
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vnarr_media::MediaError;

    #[test]
    fn test_cancellation_detected_through_media() {
        assert!(WorkerError::Cancelled.is_cancelled());
        assert!(WorkerError::from(MediaError::Cancelled).is_cancelled());
        assert!(!WorkerError::from(MediaError::Timeout(Duration::from_secs(5))).is_cancelled());
        assert_eq!(WorkerError::Cancelled.to_string(), STOPPED_BY_USER);
    }

    #[test]
    fn test_chain_walks_sources() {
        let err = WorkerError::from(MediaError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk on fire",
        )));
        let chain = err.chain();
        assert_eq!(chain[0], "Media error: IO error: disk on fire");
        assert_eq!(chain.last().map(String::as_str), Some("disk on fire"));
    }
}
