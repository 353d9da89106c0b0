//! Job executor.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use vnarr_models::{Job, JobStatus};
use vnarr_queue::{JobAdmissionQueue, QueueStatus};
use vnarr_store::JobStore;

use crate::error::WorkerResult;
use crate::workflow::WorkflowExecutor;

/// Admits jobs through the queue and runs them to a terminal state.
#[derive(Clone)]
pub struct JobExecutor {
    queue: JobAdmissionQueue,
    workflow: WorkflowExecutor,
    jobs: Arc<dyn JobStore>,
}

impl JobExecutor {
    pub fn new(queue: JobAdmissionQueue, workflow: WorkflowExecutor) -> Self {
        let jobs = Arc::clone(&workflow.deps.jobs);
        Self {
            queue,
            workflow,
            jobs,
        }
    }

    /// Persist, admit and run `job`.
    ///
    /// A job rejected with `QUEUE_FULL` is deleted and the queue error is
    /// returned. An admitted job always releases its slot, whatever its
    /// outcome.
    pub async fn submit(&self, job: Job, cancel: watch::Receiver<bool>) -> WorkerResult<Job> {
        self.jobs.save_job(&job).await?;

        let ticket = match self.queue.enqueue(&job.id, &job.spec) {
            Ok(ticket) => ticket,
            Err(e) => {
                if e.is_queue_full() {
                    warn!(job_id = %job.id, "Rejected over capacity, deleting job");
                    if let Err(delete_err) = self.jobs.delete_job(&job.id).await {
                        warn!(job_id = %job.id, "Failed to delete rejected job: {}", delete_err);
                    }
                }
                return Err(e.into());
            }
        };

        let job_id = job.id.clone();
        let result = self.workflow.run(job, cancel).await;
        ticket.release();

        match &result {
            Ok(job) if job.status == JobStatus::Completed => {
                info!(job_id = %job_id, "Job completed, slot released")
            }
            Ok(job) => info!(
                job_id = %job_id,
                "Job ended {}: {}, slot released",
                job.status.as_str(),
                job.error_message.as_deref().unwrap_or("")
            ),
            Err(e) => warn!(job_id = %job_id, "Job could not be finalized: {}", e),
        }
        result
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn workflow(&self) -> &WorkflowExecutor {
        &self.workflow
    }
}
