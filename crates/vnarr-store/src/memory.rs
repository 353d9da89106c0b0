//! In-memory store for tests and single-process runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use vnarr_models::{CheckpointPatch, Job, JobCheckpoint, JobId, StepRecord, StepStatus};

use crate::error::{StoreError, StoreResult};
use crate::traits::{running_attempt, JobStateStore, JobStore, StepHistoryStore};

#[derive(Default)]
struct Inner {
    next_id: u64,
    steps: HashMap<JobId, Vec<StepRecord>>,
    checkpoints: HashMap<JobId, JobCheckpoint>,
    jobs: HashMap<JobId, Job>,
}

/// Process-local implementation of every store trait.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total records across all jobs.
    pub async fn record_count(&self) -> usize {
        self.inner.read().await.steps.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl StepHistoryStore for InMemoryStore {
    async fn append(&self, mut record: StepRecord) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;

        if record.status == StepStatus::Running {
            let key = record.key();
            let open = inner
                .steps
                .get(&record.job_id)
                .and_then(|history| running_attempt(history, &key));
            if let Some(attempt) = open {
                return Err(StoreError::AttemptAlreadyRunning {
                    key: key.to_string(),
                    attempt,
                });
            }
        }

        inner.next_id += 1;
        record.id = inner.next_id;
        let id = record.id;
        inner
            .steps
            .entry(record.job_id.clone())
            .or_default()
            .push(record);
        Ok(id)
    }

    async fn query_by_job(&self, job_id: &JobId) -> StoreResult<Vec<StepRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .steps
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl JobStateStore for InMemoryStore {
    async fn get(&self, job_id: &JobId) -> StoreResult<Option<JobCheckpoint>> {
        Ok(self.inner.read().await.checkpoints.get(job_id).cloned())
    }

    async fn upsert(&self, job_id: &JobId, patch: CheckpointPatch) -> StoreResult<JobCheckpoint> {
        let mut inner = self.inner.write().await;
        let checkpoint = inner
            .checkpoints
            .entry(job_id.clone())
            .or_insert_with(|| JobCheckpoint::new(job_id.clone()));
        checkpoint.apply(patch);
        Ok(checkpoint.clone())
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<Job>> {
        Ok(self.inner.read().await.jobs.get(job_id).cloned())
    }

    async fn save_job(&self, job: &Job) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .jobs
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn delete_job(&self, job_id: &JobId) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.jobs.remove(job_id);
        inner.checkpoints.remove(job_id);
        inner.steps.remove(job_id);
        Ok(())
    }
}
