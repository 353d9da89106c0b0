//! Bounded job admission.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use vnarr_models::{JobId, WorkflowSpec};

use crate::error::{QueueError, QueueResult};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Jobs allowed in the running set at once
    pub max_concurrent_jobs: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: std::env::var("QUEUE_MAX_CONCURRENT_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
        }
    }
}

/// Snapshot of the running set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub running: usize,
    pub max_concurrent: usize,
}

type RunningSet = Arc<Mutex<HashSet<JobId>>>;

fn lock(running: &RunningSet) -> MutexGuard<'_, HashSet<JobId>> {
    // The set stays consistent even if a holder panicked mid-insert
    running.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Admission gate shared by every job submission path.
///
/// Cloning shares the same gate.
#[derive(Clone)]
pub struct JobAdmissionQueue {
    semaphore: Arc<Semaphore>,
    running: RunningSet,
    max_concurrent: usize,
}

impl JobAdmissionQueue {
    pub fn new(config: QueueConfig) -> Self {
        let max_concurrent = config.max_concurrent_jobs.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            running: Arc::new(Mutex::new(HashSet::new())),
            max_concurrent,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::new(QueueConfig::from_env())
    }

    /// Try to admit a job into the running set.
    ///
    /// Never waits: a full running set yields [`QueueError::QueueFull`]. The
    /// returned ticket holds the slot until it is released or dropped.
    pub fn enqueue(&self, job_id: &JobId, spec: &WorkflowSpec) -> QueueResult<AdmissionTicket> {
        let mut running = lock(&self.running);

        if running.contains(job_id) {
            warn!(job_id = %job_id, "Rejected duplicate admission");
            return Err(QueueError::AlreadyRunning(job_id.clone()));
        }

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                counter!("vnarr_jobs_rejected_total").increment(1);
                info!(
                    job_id = %job_id,
                    running = running.len(),
                    max_concurrent = self.max_concurrent,
                    "Admission refused: queue full"
                );
                return Err(QueueError::QueueFull {
                    max_concurrent: self.max_concurrent,
                });
            }
            Err(TryAcquireError::Closed) => return Err(QueueError::Closed),
        };

        running.insert(job_id.clone());
        counter!("vnarr_jobs_admitted_total").increment(1);
        gauge!("vnarr_jobs_running").set(running.len() as f64);
        info!(
            job_id = %job_id,
            max_concurrent_scenes = spec.max_concurrent_scenes,
            platform = spec.target_platform.as_str(),
            "Job admitted ({}/{})",
            running.len(),
            self.max_concurrent
        );

        Ok(AdmissionTicket {
            job_id: job_id.clone(),
            running: Arc::clone(&self.running),
            permit: Some(permit),
        })
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            running: lock(&self.running).len(),
            max_concurrent: self.max_concurrent,
        }
    }

    pub fn is_running(&self, job_id: &JobId) -> bool {
        lock(&self.running).contains(job_id)
    }
}

/// Proof of admission. Dropping it frees the slot, so completion, failure,
/// cancellation and panics all release the job.
#[must_use = "dropping the ticket releases the admission slot"]
pub struct AdmissionTicket {
    job_id: JobId,
    running: RunningSet,
    permit: Option<OwnedSemaphorePermit>,
}

impl AdmissionTicket {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Release the slot now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        let mut running = lock(&self.running);
        running.remove(&self.job_id);
        // Return the permit while the set is locked so status never shows a
        // free slot that enqueue would still refuse
        self.permit.take();
        gauge!("vnarr_jobs_running").set(running.len() as f64);
        debug!(job_id = %self.job_id, "Admission slot released");
    }
}

impl std::fmt::Debug for AdmissionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionTicket")
            .field("job_id", &self.job_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use vnarr_models::SceneFailurePolicy;

    fn spec() -> WorkflowSpec {
        WorkflowSpec::new(SceneFailurePolicy::FailJob)
    }

    fn queue(max: usize) -> JobAdmissionQueue {
        JobAdmissionQueue::new(QueueConfig {
            max_concurrent_jobs: max,
        })
    }

    #[tokio::test]
    async fn test_concurrent_submissions_respect_capacity() {
        let queue = queue(2);
        let ids: Vec<JobId> = (0..3).map(|i| JobId::from_string(format!("job-{i}"))).collect();

        let attempts = ids.iter().map(|id| {
            let queue = queue.clone();
            let id = id.clone();
            tokio::spawn(async move { queue.enqueue(&id, &spec()) })
        });
        let results: Vec<_> = futures::future::join_all(attempts)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let accepted = results.iter().filter(|r| r.is_ok()).count();
        let rejected: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(accepted, 2);
        assert_eq!(rejected.len(), 1);
        assert!(rejected[0].is_queue_full());
        assert_eq!(rejected[0].to_string(), crate::QUEUE_FULL);
        assert_eq!(
            queue.status(),
            QueueStatus {
                running: 2,
                max_concurrent: 2
            }
        );
    }

    #[test]
    fn test_release_allows_next_admission() {
        let queue = queue(1);
        let first = JobId::from_string("first");
        let second = JobId::from_string("second");

        let ticket = assert_ok!(queue.enqueue(&first, &spec()));
        assert!(queue.is_running(&first));
        assert!(assert_err!(queue.enqueue(&second, &spec())).is_queue_full());

        ticket.release();
        assert!(!queue.is_running(&first));
        assert_eq!(queue.status().running, 0);

        let ticket = assert_ok!(queue.enqueue(&second, &spec()));
        assert_eq!(ticket.job_id(), &second);
    }

    #[test]
    fn test_duplicate_admission_rejected() {
        let queue = queue(3);
        let id = JobId::from_string("job");

        let _ticket = queue.enqueue(&id, &spec()).unwrap();
        assert!(matches!(
            queue.enqueue(&id, &spec()),
            Err(QueueError::AlreadyRunning(_))
        ));
        assert_eq!(queue.status().running, 1);
    }

    #[tokio::test]
    async fn test_panicking_holder_releases_slot() {
        let queue = queue(1);
        let ticket = queue.enqueue(&JobId::from_string("doomed"), &spec()).unwrap();

        let handle = tokio::spawn(async move {
            let _ticket = ticket;
            panic!("job task crashed");
        });
        assert!(handle.await.is_err());

        assert_eq!(queue.status().running, 0);
        assert!(queue.enqueue(&JobId::from_string("next"), &spec()).is_ok());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue = queue(0);
        assert_eq!(queue.status().max_concurrent, 1);
    }
}
