//! Repository traits consumed by the workflow executor.

use async_trait::async_trait;

use vnarr_models::{CheckpointPatch, Job, JobCheckpoint, JobId, StepKey, StepRecord, StepStatus};

use crate::error::StoreResult;

/// Append-only log of step attempts.
///
/// Implementations must reject a `running` record for a key that already has
/// an open attempt, and the append must be durable before it returns.
#[async_trait]
pub trait StepHistoryStore: Send + Sync {
    /// Append a record; returns its store-assigned id.
    async fn append(&self, record: StepRecord) -> StoreResult<u64>;

    /// All records of a job in append order.
    async fn query_by_job(&self, job_id: &JobId) -> StoreResult<Vec<StepRecord>>;
}

/// The single mutable checkpoint per job.
#[async_trait]
pub trait JobStateStore: Send + Sync {
    async fn get(&self, job_id: &JobId) -> StoreResult<Option<JobCheckpoint>>;

    /// Merge `patch` into the checkpoint, creating it if missing.
    async fn upsert(&self, job_id: &JobId, patch: CheckpointPatch) -> StoreResult<JobCheckpoint>;
}

/// Job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<Job>>;

    async fn save_job(&self, job: &Job) -> StoreResult<()>;

    /// Remove a job (used when admission rejects it).
    async fn delete_job(&self, job_id: &JobId) -> StoreResult<()>;
}

/// Attempt number of the open `running` attempt for `key`, if any.
///
/// Attempts for one key are sequential, so the key's latest record decides.
pub fn running_attempt<'a, I>(records: I, key: &StepKey) -> Option<u32>
where
    I: IntoIterator<Item = &'a StepRecord>,
    I::IntoIter: DoubleEndedIterator,
{
    records
        .into_iter()
        .rev()
        .find(|r| r.key() == *key)
        .filter(|r| r.status == StepStatus::Running)
        .map(|r| r.attempt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vnarr_models::{StageId, StepPayload, SubStepId};

    #[test]
    fn test_running_attempt_follows_latest_record() {
        let job = JobId::from_string("job-1");
        let key = StepKey::scene(StageId::AudioVideoSync, SubStepId::SynthesizeAudio, 2);
        let other = StepKey::scene(StageId::AudioVideoSync, SubStepId::SynthesizeAudio, 3);

        let first = StepRecord::running(&job, &key, 1);
        let mut history = vec![first.clone()];
        assert_eq!(running_attempt(&history, &key), Some(1));
        assert_eq!(running_attempt(&history, &other), None);

        history.push(first.failed("timed out", None, None));
        assert_eq!(running_attempt(&history, &key), None);

        let second = StepRecord::running(&job, &key, 2);
        history.push(second.clone());
        assert_eq!(running_attempt(&history, &key), Some(2));

        history.push(second.completed(StepPayload::not_applicable("test")));
        assert_eq!(running_attempt(&history, &key), None);
    }
}
