//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use vnarr_models::{ErrorCategory, StepKey};

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Metric names as constants for consistency.
pub mod names {
    // Step metrics
    pub const STEPS_COMPLETED_TOTAL: &str = "vnarr_steps_completed_total";
    pub const STEPS_SKIPPED_TOTAL: &str = "vnarr_steps_skipped_total";
    pub const STEPS_FAILED_TOTAL: &str = "vnarr_steps_failed_total";
    pub const STEPS_RETRIED_TOTAL: &str = "vnarr_steps_retried_total";
    pub const STEP_DURATION_SECONDS: &str = "vnarr_step_duration_seconds";

    // Job metrics
    pub const JOBS_COMPLETED_TOTAL: &str = "vnarr_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vnarr_jobs_failed_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "vnarr_jobs_cancelled_total";
    pub const JOB_DURATION_SECONDS: &str = "vnarr_job_duration_seconds";

    // Scene metrics
    pub const SCENES_FAILED_TOTAL: &str = "vnarr_scenes_failed_total";
}

fn step_labels(key: &StepKey) -> [(&'static str, String); 2] {
    [
        ("stage", key.stage.as_str().to_string()),
        ("sub_step", key.sub_step.as_str().to_string()),
    ]
}

/// Record a finished step attempt.
pub fn record_step_completed(key: &StepKey, skipped: bool, duration_secs: f64) {
    let labels = step_labels(key);
    if skipped {
        counter!(names::STEPS_SKIPPED_TOTAL, &labels).increment(1);
    } else {
        counter!(names::STEPS_COMPLETED_TOTAL, &labels).increment(1);
    }
    histogram!(names::STEP_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a failed step attempt.
pub fn record_step_failed(key: &StepKey, category: Option<ErrorCategory>) {
    let [stage, sub_step] = step_labels(key);
    let category = category.map(|c| c.as_str()).unwrap_or("cancelled");
    let labels = [stage, sub_step, ("category", category.to_string())];
    counter!(names::STEPS_FAILED_TOTAL, &labels).increment(1);
}

/// Record a retry about to be scheduled.
pub fn record_step_retry(key: &StepKey) {
    counter!(names::STEPS_RETRIED_TOTAL, &step_labels(key)).increment(1);
}

/// Record a scene dropped from the job.
pub fn record_scene_failed(key: &StepKey) {
    counter!(names::SCENES_FAILED_TOTAL, &step_labels(key)).increment(1);
}

/// Record job completion.
pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration_secs);
}

/// Record job failure.
pub fn record_job_failed(category: Option<ErrorCategory>) {
    match category {
        Some(category) => {
            counter!(names::JOBS_FAILED_TOTAL, "category" => category.as_str()).increment(1)
        }
        None => counter!(names::JOBS_CANCELLED_TOTAL).increment(1),
    }
}
