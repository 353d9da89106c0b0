//! Structured job logging utilities.
//!
//! Every line carries the job id, and step lines also carry the stage,
//! sub-step and scene, so one job can be followed through interleaved
//! output of concurrent jobs and scenes.

use tracing::{error, info, warn, Span};
use vnarr_models::{JobId, SceneId, StepKey};

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
}

impl JobLogger {
    /// Create a new job logger for a specific job and operation.
    ///
    /// # Arguments
    /// * `job_id` - The unique identifier for the job
    /// * `operation` - The kind of run (e.g. "narration_pipeline", "resume")
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    /// Log a step attempt transition.
    pub fn log_step(&self, key: &StepKey, attempt: u32, message: &str) {
        info!(
            job_id = %self.job_id,
            stage = %key.stage,
            sub_step = %key.sub_step,
            scene_id = key.scene_id,
            attempt,
            "{}", message
        );
    }

    /// Log a failed step attempt.
    pub fn log_step_failure(&self, key: &StepKey, attempt: u32, message: &str) {
        warn!(
            job_id = %self.job_id,
            stage = %key.stage,
            sub_step = %key.sub_step,
            scene_id = key.scene_id,
            attempt,
            "Step attempt failed: {}", message
        );
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }

    /// Span for one scene inside a fan-out.
    pub fn scene_span(&self, key: &StepKey, scene_id: SceneId) -> Span {
        tracing::info_span!(
            "scene",
            job_id = %self.job_id,
            stage = %key.stage,
            sub_step = %key.sub_step,
            scene_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vnarr_models::{StageId, SubStepId};

    #[test]
    fn test_job_logging_does_not_panic_without_subscriber() {
        let logger = JobLogger::new(&JobId::from_string("test-job-123"), "narration_pipeline");
        let _guard = logger.create_span().entered();
        logger.log_start("2 videos");
        logger.log_progress("analysis.probe_inputs");
        logger.log_completion("/tmp/final.mp4");
    }

    #[test]
    fn test_step_logging_does_not_panic_without_subscriber() {
        let logger = JobLogger::new(&JobId::from_string("job"), "narration_pipeline");
        let key = StepKey::scene(StageId::AudioVideoSync, SubStepId::MergeAudioVideo, 2);
        logger.log_step(&key, 1, "Step started");
        logger.log_step_failure(&key, 1, "merge timed out");
        let _guard = logger.scene_span(&key, 2).entered();
    }
}
