//! Job admission for the narration pipeline.
//!
//! At most `max_concurrent_jobs` jobs run at once. Admission is a
//! point-in-time decision: over capacity, `enqueue` fails immediately with
//! the `QUEUE_FULL` sentinel instead of buffering.

pub mod admission;
pub mod error;

pub use admission::{AdmissionTicket, JobAdmissionQueue, QueueConfig, QueueStatus};
pub use error::{QueueError, QueueResult, QUEUE_FULL};
