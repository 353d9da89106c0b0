//! Narration pipeline worker binary.
//!
//! Runs (or resumes) the jobs described by the JSON files given on the
//! command line, at most `WORKER_MAX_JOBS` at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use futures::future::join_all;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vnarr_ai::HttpAiClient;
use vnarr_media::{check_ffmpeg, check_ffprobe, FfmpegToolkit};
use vnarr_models::{InputVideo, Job, JobId, JobStatus, WorkflowSpec};
use vnarr_queue::{JobAdmissionQueue, QueueConfig};
use vnarr_store::{JobStore, RedisStore};
use vnarr_worker::metrics::init_metrics;
use vnarr_worker::{JobExecutor, WorkerConfig, WorkflowDeps, WorkflowExecutor, WorkflowSettings};

/// Job description read from disk.
#[derive(Debug, Deserialize)]
struct JobFile {
    /// Set to resume an existing job
    #[serde(default)]
    id: Option<JobId>,
    videos: Vec<InputVideo>,
    spec: WorkflowSpec,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing()?;
    info!("Starting vnarr-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        init_metrics(addr).context("Failed to install metrics exporter")?;
        info!("Metrics listening on {}", addr);
    }

    let paths: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        anyhow::bail!("usage: vnarr-worker <job.json>...");
    }

    if config.ffmpeg_path == Path::new("ffmpeg") {
        check_ffmpeg()?;
    }
    if config.ffprobe_path == Path::new("ffprobe") {
        check_ffprobe()?;
    }

    let store = Arc::new(RedisStore::from_env().context("Failed to create Redis store")?);
    store.ping().await.context("Redis is unreachable")?;
    let ai = Arc::new(HttpAiClient::from_env().context("Failed to create AI client")?);
    let media = Arc::new(FfmpegToolkit::with_binaries(
        config.ffmpeg_path.clone(),
        config.ffprobe_path.clone(),
        config.ffmpeg_timeout,
    ));

    let deps = WorkflowDeps {
        history: store.clone(),
        checkpoints: store.clone(),
        jobs: store.clone(),
        analyzer: ai.clone(),
        writer: ai.clone(),
        synthesizer: ai,
        media,
    };
    let workflow = WorkflowExecutor::new(deps, WorkflowSettings::from_config(&config));
    let queue = JobAdmissionQueue::new(QueueConfig {
        max_concurrent_jobs: config.max_concurrent_jobs,
    });
    let executor = JobExecutor::new(queue, workflow);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, stopping running jobs");
            cancel_tx.send(true).ok();
        }
    });

    let mut jobs = Vec::with_capacity(paths.len());
    for path in &paths {
        jobs.push(load_job(path, store.as_ref()).await?);
    }

    // Submit in waves no larger than the admission capacity
    let mut failed = 0usize;
    for wave in jobs.chunks(config.max_concurrent_jobs.max(1)) {
        if *cancel_rx.borrow() {
            break;
        }
        let results = join_all(
            wave.iter()
                .cloned()
                .map(|job| executor.submit(job, cancel_rx.clone())),
        )
        .await;

        for result in results {
            match result {
                Ok(job) if job.status == JobStatus::Completed => {
                    info!(job_id = %job.id, "Job completed");
                }
                Ok(job) => {
                    failed += 1;
                    error!(
                        job_id = %job.id,
                        category = ?job.error_category,
                        "Job failed: {}",
                        job.error_message.as_deref().unwrap_or("unknown error")
                    );
                    if let Some(guidance) = &job.error_guidance {
                        info!(job_id = %job.id, "{}", guidance);
                    }
                }
                Err(e) => {
                    failed += 1;
                    error!("Job could not run: {}", e);
                }
            }
        }
    }

    info!("Worker shutdown complete");
    if failed > 0 {
        anyhow::bail!("{} of {} job(s) did not complete", failed, jobs.len());
    }
    Ok(())
}

/// Initialize tracing with colored output for dev, JSON for production.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vnarr=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()?;
    }
    Ok(())
}

/// Read a job file, resuming the stored job when its id is known.
async fn load_job(path: &Path, jobs: &dyn JobStore) -> anyhow::Result<Job> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: JobFile = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    if let Some(id) = &file.id {
        if let Some(existing) = jobs.get_job(id).await? {
            info!(job_id = %id, status = existing.status.as_str(), "Resuming stored job");
            return Ok(existing);
        }
    }

    let mut job = Job::new(file.videos, file.spec);
    if let Some(id) = file.id {
        job.id = id;
    }
    info!(job_id = %job.id, "Loaded new job from {}", path.display());
    Ok(job)
}
