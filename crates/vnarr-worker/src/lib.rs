//! Narration pipeline worker.
//!
//! This crate provides:
//! - The step registry and progress derived from step history
//! - The workflow executor with idempotent resume
//! - Bounded per-scene fan-out with a per-scene failure policy
//! - Error classification and retry with backoff
//! - Job admission through the single-flight queue

mod actions;

pub mod classifier;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod recovery;
pub mod registry;
pub mod retry;
pub mod state;
pub mod workflow;

pub use classifier::{classify, classify_error, ErrorClassification};
pub use concurrency::{run_bounded, Cancelled};
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult, STOPPED_BY_USER};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use registry::{StepContext, Stage};
pub use retry::RetryPolicy;
pub use state::RunState;
pub use workflow::{WorkflowDeps, WorkflowExecutor, WorkflowSettings};
