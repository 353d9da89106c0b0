//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs admitted by this worker
    pub max_concurrent_jobs: usize,
    /// System-wide cap on scenes processed in parallel within a job
    pub max_scene_parallel: usize,
    /// Work directory for per-job scratch files
    pub work_dir: PathBuf,
    /// Stuck-step watchdog: longest a single sub-step may run
    pub max_step_duration: Duration,
    /// Timeout for each media subprocess
    pub ffmpeg_timeout: Duration,
    /// Attempts per sub-step (and per scene) before the job fails
    pub max_attempts: u32,
    /// Attempts for storage/filesystem failures
    pub system_max_attempts: u32,
    /// First backoff delay; doubles each attempt
    pub retry_base_delay: Duration,
    /// Backoff ceiling
    pub retry_max_delay: Duration,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Prometheus listener, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            max_scene_parallel: 5,
            work_dir: PathBuf::from("/tmp/vnarr"),
            max_step_duration: Duration::from_secs(3600), // 1 hour
            ffmpeg_timeout: Duration::from_secs(900),
            max_attempts: 3,
            system_max_attempts: 2,
            retry_base_delay: Duration::from_millis(2000),
            retry_max_delay: Duration::from_secs(60),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            max_scene_parallel: std::env::var("WORKER_MAX_SCENE_PARALLEL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/vnarr")),
            max_step_duration: Duration::from_secs(
                std::env::var("WORKER_STEP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            ffmpeg_timeout: Duration::from_secs(
                std::env::var("WORKER_FFMPEG_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(900),
            ),
            max_attempts: std::env::var("WORKER_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            system_max_attempts: std::env::var("WORKER_SYSTEM_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            retry_base_delay: Duration::from_millis(
                std::env::var("WORKER_RETRY_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),
            retry_max_delay: Duration::from_secs(60),
            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("ffmpeg")),
            ffprobe_path: std::env::var("FFPROBE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("ffprobe")),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Scratch directory of one job.
    pub fn job_dir(&self, job_id: &vnarr_models::JobId) -> PathBuf {
        self.work_dir.join(job_id.as_str())
    }
}
