//! Workflow executor.
//!
//! Drives one job through every stage and sub-step of the registry. Each
//! sub-step attempt is bracketed by step records: a `running` record before
//! the action and a terminal record after it, appended durably before the
//! executor moves on. Run state is only ever derived from those records, so
//! a restarted worker resumes at the exact sub-step (and, inside a fan-out,
//! the exact scene) where the previous one stopped.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use vnarr_ai::{NarrationWriter, SceneAnalyzer, SpeechSynthesizer};
use vnarr_media::{MediaToolkit, RunOptions};
use vnarr_models::{
    CheckpointPatch, Job, SceneFailurePolicy, SceneId, SceneTask, StepKey, StepPayload, StepRecord,
    StepStatus,
};
use vnarr_store::{JobStateStore, JobStore, StepHistoryStore};

use crate::classifier::{classify_error, ErrorClassification};
use crate::concurrency::{run_bounded, wait_for_cancel};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult, STOPPED_BY_USER};
use crate::logging::JobLogger;
use crate::metrics;
use crate::recovery::infer_completed_from_checkpoint;
use crate::registry::{self, StepContext};
use crate::retry::RetryPolicy;
use crate::state::RunState;

const INTERRUPTED: &str = "attempt interrupted before completion";

/// Collaborators of the executor.
#[derive(Clone)]
pub struct WorkflowDeps {
    pub history: Arc<dyn StepHistoryStore>,
    pub checkpoints: Arc<dyn JobStateStore>,
    pub jobs: Arc<dyn JobStore>,
    pub analyzer: Arc<dyn SceneAnalyzer>,
    pub writer: Arc<dyn NarrationWriter>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub media: Arc<dyn MediaToolkit>,
}

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Parent of the per-job scratch directories
    pub work_dir: PathBuf,
    pub retry: RetryPolicy,
    /// Stuck-step watchdog
    pub max_step_duration: Duration,
    /// Timeout for each media subprocess
    pub media_timeout: Duration,
    /// System-wide cap applied on top of the job's own scene concurrency
    pub max_scene_parallel: usize,
}

impl WorkflowSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            retry: RetryPolicy::from_config(config),
            max_step_duration: config.max_step_duration,
            media_timeout: config.ffmpeg_timeout,
            max_scene_parallel: config.max_scene_parallel,
        }
    }
}

/// Result of a successful sub-step action.
#[derive(Debug, Clone)]
pub(crate) enum StepOutcome {
    Completed(StepPayload),
    /// The sub-step's precondition did not apply
    Skipped(StepPayload),
}

impl StepOutcome {
    pub(crate) fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(StepPayload::not_applicable(reason))
    }

    fn close(self, running: &StepRecord) -> StepRecord {
        match self {
            StepOutcome::Completed(payload) => running.completed(payload),
            StepOutcome::Skipped(payload) => running.skipped(payload),
        }
    }
}

/// Per-run context shared by every action of one job.
pub(crate) struct JobRun<'a> {
    pub job: &'a Job,
    pub logger: JobLogger,
    pub cancel: watch::Receiver<bool>,
    /// Scratch directory for this job's artifacts
    pub dir: PathBuf,
}

impl JobRun<'_> {
    pub(crate) fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// What one scene's run through a fan-out sub-step produced.
struct SceneRun {
    records: Vec<StepRecord>,
    /// Final error once retries are exhausted
    failure: Option<String>,
}

/// Drives jobs through the narration pipeline.
#[derive(Clone)]
pub struct WorkflowExecutor {
    pub(crate) deps: WorkflowDeps,
    pub(crate) settings: WorkflowSettings,
}

impl WorkflowExecutor {
    pub fn new(deps: WorkflowDeps, settings: WorkflowSettings) -> Self {
        Self { deps, settings }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Run (or resume) `job` to a terminal state and persist it.
    ///
    /// Pipeline failures end up on the returned job as `failed`; an `Err`
    /// means the terminal state itself could not be stored.
    pub async fn run(&self, job: Job, cancel: watch::Receiver<bool>) -> WorkerResult<Job> {
        let logger = JobLogger::new(&job.id, "narration_pipeline");
        let span = logger.create_span();
        self.run_job(job, cancel, logger).instrument(span).await
    }

    async fn run_job(
        &self,
        mut job: Job,
        cancel: watch::Receiver<bool>,
        logger: JobLogger,
    ) -> WorkerResult<Job> {
        job.mark_started();
        self.deps.jobs.save_job(&job).await?;
        logger.log_start(&format!(
            "{} video(s), {} scene(s) in parallel, policy {:?}",
            job.video_count(),
            job.spec.scene_concurrency(),
            job.spec.scene_failure_policy
        ));

        let started = Instant::now();
        let run = JobRun {
            job: &job,
            logger: logger.clone(),
            cancel,
            dir: self.settings.work_dir.join(job.id.as_str()),
        };
        let outcome = self.drive(&run).await;
        // Ends the borrow of `job` before it is updated
        drop(run);

        match outcome {
            Ok(final_output) => {
                self.deps
                    .checkpoints
                    .upsert(&job.id, CheckpointPatch::default().with_final_output(&final_output))
                    .await?;
                job.mark_completed();
                metrics::record_job_completed(started.elapsed().as_secs_f64());
                logger.log_completion(&format!("final cut at {}", final_output.display()));
            }
            Err(err) if err.is_cancelled() => {
                if let Err(e) = self.deps.checkpoints.upsert(&job.id, CheckpointPatch::stopped()).await {
                    logger.log_warning(&format!("could not flag checkpoint as stopped: {}", e));
                }
                job.mark_failed(STOPPED_BY_USER, None, None);
                metrics::record_job_failed(None);
                logger.log_warning(STOPPED_BY_USER);
            }
            Err(err) => {
                let classification = classify_error(&err);
                logger.log_error(&format!("{} ({})", err, classification.category));
                metrics::record_job_failed(Some(classification.category));
                job.mark_failed(
                    err.to_string(),
                    Some(classification.category),
                    Some(classification.guidance),
                );
            }
        }

        self.deps.jobs.save_job(&job).await?;
        Ok(job)
    }

    /// Walk the registry until the final output exists.
    async fn drive(&self, run: &JobRun<'_>) -> WorkerResult<PathBuf> {
        let job = run.job;
        job.spec.validate(job.video_count())?;
        tokio::fs::create_dir_all(&run.dir).await?;

        let mut state = self.load_state(run).await?;

        let mut index = 0;
        loop {
            // Conditional sub-steps depend on the scene plan, which only
            // exists once analysis has run
            let ctx = StepContext::for_job(job, &state.scenes);
            let stages = registry::stages(&ctx);
            let Some(stage) = stages.get(index) else {
                break;
            };

            for &sub_step in &stage.sub_steps {
                self.run_sub_step(run, StepKey::job_level(stage.id, sub_step), &mut state)
                    .await?;
                run.logger.log_progress(&format!(
                    "{:.0}% ({})",
                    registry::progress(state.history(), &ctx),
                    registry::label(stage.id, sub_step)
                ));
            }
            index += 1;
        }

        state
            .final_output
            .clone()
            .ok_or_else(|| WorkerError::state("pipeline finished without a final output"))
    }

    /// Replay history (seeding it from a legacy checkpoint when empty) and
    /// close attempts a previous worker left open.
    async fn load_state(&self, run: &JobRun<'_>) -> WorkerResult<RunState> {
        let job = run.job;
        let mut history = self.deps.history.query_by_job(&job.id).await?;

        if history.is_empty() {
            if let Some(checkpoint) = self.deps.checkpoints.get(&job.id).await? {
                let ctx = StepContext::for_job(job, &[]);
                let seeded = infer_completed_from_checkpoint(&job.id, &checkpoint, &ctx);
                if !seeded.is_empty() {
                    run.logger.log_warning(&format!(
                        "no step history; seeding {} records from legacy checkpoint",
                        seeded.len()
                    ));
                }
                for record in seeded {
                    self.deps.history.append(record.clone()).await?;
                    history.push(record);
                }
            }
        } else {
            info!(job_id = %job.id, "Resuming from {} step records", history.len());
        }

        let mut state = RunState::replay(&history);
        for open in state.open_attempts() {
            warn!(job_id = %job.id, step = %open.key(), attempt = open.attempt, "Closing interrupted attempt");
            self.record(&mut state, open.failed(INTERRUPTED, None, None))
                .await?;
        }
        Ok(state)
    }

    /// Append `record` and fold it into the run state.
    async fn record(&self, state: &mut RunState, record: StepRecord) -> WorkerResult<()> {
        self.deps.history.append(record.clone()).await?;
        state.apply(&record);
        Ok(())
    }

    async fn run_sub_step(
        &self,
        run: &JobRun<'_>,
        key: StepKey,
        state: &mut RunState,
    ) -> WorkerResult<()> {
        let job = run.job;
        if state.is_done(&key) {
            debug!(job_id = %job.id, step = %key, "Already done, skipping");
            return Ok(());
        }
        if run.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }

        let (processed, total) = state.scene_counts();
        self.deps
            .checkpoints
            .upsert(
                &job.id,
                CheckpointPatch::position(key.stage, key.sub_step).with_scenes(processed, total),
            )
            .await?;

        if key.sub_step.is_per_scene() {
            return self.run_fan_out(run, &key, state).await;
        }

        let mut attempt = state.last_attempt(&key);
        loop {
            attempt += 1;
            let running = StepRecord::running(&job.id, &key, attempt);
            self.record(state, running.clone()).await?;
            run.logger.log_step(&key, attempt, "Step started");

            let started = Instant::now();
            let result = self
                .with_watchdog(&key, self.execute(run, key.sub_step, state))
                .await;

            let err = match result {
                Ok(outcome) => {
                    let closed = outcome.close(&running);
                    let skipped = closed.status == StepStatus::Skipped;
                    self.record(state, closed).await?;
                    metrics::record_step_completed(&key, skipped, started.elapsed().as_secs_f64());
                    run.logger.log_step(&key, attempt, if skipped { "Step skipped" } else { "Step completed" });
                    return Ok(());
                }
                Err(err) => err,
            };

            if err.is_cancelled() || run.is_cancelled() {
                self.record(state, running.failed(STOPPED_BY_USER, None, None))
                    .await?;
                metrics::record_step_failed(&key, None);
                return Err(WorkerError::Cancelled);
            }
            if err.is_watchdog() {
                self.close_after_watchdog(run, &err).await?;
                return Err(err);
            }

            let classification = classify_error(&err);
            self.record(state, failed_record(&running, &err, &classification))
                .await?;
            metrics::record_step_failed(&key, Some(classification.category));
            run.logger.log_step_failure(&key, attempt, &err.to_string());

            if !self.settings.retry.should_retry(&classification, attempt) {
                return Err(err);
            }
            self.backoff(run, &key, attempt).await?;
        }
    }

    /// Run a per-scene sub-step over every eligible scene.
    async fn run_fan_out(
        &self,
        run: &JobRun<'_>,
        key: &StepKey,
        state: &mut RunState,
    ) -> WorkerResult<()> {
        let job = run.job;
        let running = StepRecord::running(&job.id, key, state.last_attempt(key) + 1);
        self.record(state, running.clone()).await?;
        let started = Instant::now();

        let candidates = state.scenes_for(key.sub_step);
        let scene_key = |id: SceneId| StepKey::scene(key.stage, key.sub_step, id);
        let pending: Vec<(SceneTask, u32)> = candidates
            .iter()
            .filter(|scene| !state.is_done(&scene_key(scene.id)))
            .map(|scene| (scene.clone(), state.last_attempt(&scene_key(scene.id))))
            .collect();

        let concurrency = job
            .spec
            .scene_concurrency()
            .min(self.settings.max_scene_parallel.max(1));
        info!(
            job_id = %job.id,
            step = %key,
            "Processing {} of {} scene(s), {} at a time",
            pending.len(),
            candidates.len(),
            concurrency
        );

        let batch = async {
            run_bounded(pending, concurrency, &run.cancel, |(scene, prior)| {
                self.run_scene(run, key, scene, prior)
            })
            .await
            .map_err(|_| WorkerError::Cancelled)
        };
        let results = match self.with_watchdog(key, batch).await {
            Ok(results) => results,
            Err(err) if err.is_cancelled() => {
                self.record(state, running.failed(STOPPED_BY_USER, None, None))
                    .await?;
                return Err(WorkerError::Cancelled);
            }
            Err(err) => {
                self.close_after_watchdog(run, &err).await?;
                return Err(err);
            }
        };

        let mut failures: Vec<(SceneId, String)> = Vec::new();
        let mut fatal: Option<WorkerError> = None;
        for (scene_id, result) in results {
            match result {
                Ok(scene_run) => {
                    for record in &scene_run.records {
                        state.apply(record);
                    }
                    if let Some(message) = scene_run.failure {
                        metrics::record_scene_failed(key);
                        failures.push((scene_id, message));
                    }
                }
                Err(err) => {
                    fatal.get_or_insert(err);
                }
            }
        }

        let (processed, total) = state.scene_counts();
        self.deps
            .checkpoints
            .upsert(&job.id, CheckpointPatch::default().with_scenes(processed, total))
            .await?;

        if let Some(err) = fatal {
            if err.is_cancelled() || run.is_cancelled() {
                self.record(state, running.failed(STOPPED_BY_USER, None, None))
                    .await?;
                return Err(WorkerError::Cancelled);
            }
            let classification = classify_error(&err);
            self.record(state, failed_record(&running, &err, &classification))
                .await?;
            return Err(err);
        }

        if !failures.is_empty() {
            let survivors = state.surviving_scenes().count();
            let tolerated =
                job.spec.scene_failure_policy == SceneFailurePolicy::BestEffort && survivors > 0;

            if !tolerated {
                let err = WorkerError::ScenesFailed {
                    sub_step: key.sub_step,
                    failed: failures.len(),
                    total: candidates.len(),
                    first_error: failures[0].1.clone(),
                };
                let classification = classify_error(&err);
                let diagnostics = StepPayload::Diagnostics {
                    error_chain: failures
                        .iter()
                        .map(|(id, message)| format!("scene {}: {}", id, message))
                        .collect(),
                    stderr_tail: None,
                };
                self.record(
                    state,
                    running.failed(err.to_string(), Some(classification.category), Some(diagnostics)),
                )
                .await?;
                metrics::record_step_failed(key, Some(classification.category));
                return Err(err);
            }

            run.logger.log_warning(&format!(
                "{} scene(s) dropped at {}, continuing with {}",
                failures.len(),
                key.sub_step,
                survivors
            ));
        }

        let processed_ids: Vec<SceneId> = candidates
            .iter()
            .map(|s| s.id)
            .filter(|id| state.is_done(&scene_key(*id)))
            .collect();
        let all_skipped = processed_ids
            .iter()
            .all(|id| state.done_status(&scene_key(*id)) == Some(StepStatus::Skipped));

        let closed = if processed_ids.is_empty() || all_skipped {
            running.skipped(StepPayload::not_applicable(format!(
                "no scene needs {}",
                key.sub_step
            )))
        } else {
            running.completed(StepPayload::ScenesProcessed {
                processed: processed_ids,
                failed: failures.iter().map(|(id, _)| *id).collect(),
            })
        };
        let skipped = closed.status == StepStatus::Skipped;
        self.record(state, closed).await?;
        metrics::record_step_completed(key, skipped, started.elapsed().as_secs_f64());
        Ok(())
    }

    /// One scene through one sub-step, retried per scene.
    ///
    /// `Err` is reserved for cancellation and storage failures; an action
    /// that keeps failing is reported through [`SceneRun::failure`].
    async fn run_scene(
        &self,
        run: &JobRun<'_>,
        job_key: &StepKey,
        scene: SceneTask,
        prior_attempt: u32,
    ) -> (SceneId, WorkerResult<SceneRun>) {
        let key = StepKey::scene(job_key.stage, job_key.sub_step, scene.id);
        let span = run.logger.scene_span(&key, scene.id);
        let result = self
            .run_scene_attempts(run, &key, &scene, prior_attempt)
            .instrument(span)
            .await;
        (scene.id, result)
    }

    async fn run_scene_attempts(
        &self,
        run: &JobRun<'_>,
        key: &StepKey,
        scene: &SceneTask,
        prior_attempt: u32,
    ) -> WorkerResult<SceneRun> {
        let job = run.job;
        let mut records = Vec::new();
        let mut attempt = prior_attempt;

        loop {
            attempt += 1;
            let running = StepRecord::running(&job.id, key, attempt);
            self.deps.history.append(running.clone()).await?;
            records.push(running.clone());

            let err = match self.execute_scene(run, key.sub_step, scene).await {
                Ok(outcome) => {
                    let closed = outcome.close(&running);
                    self.deps.history.append(closed.clone()).await?;
                    records.push(closed);
                    return Ok(SceneRun {
                        records,
                        failure: None,
                    });
                }
                Err(err) => err,
            };

            if err.is_cancelled() || run.is_cancelled() {
                self.deps
                    .history
                    .append(running.failed(STOPPED_BY_USER, None, None))
                    .await?;
                return Err(WorkerError::Cancelled);
            }

            let classification = classify_error(&err);
            let failed = failed_record(&running, &err, &classification);
            self.deps.history.append(failed.clone()).await?;
            records.push(failed);
            metrics::record_step_failed(key, Some(classification.category));
            run.logger.log_step_failure(key, attempt, &err.to_string());

            if !self.settings.retry.should_retry(&classification, attempt) {
                return Ok(SceneRun {
                    records,
                    failure: Some(err.to_string()),
                });
            }
            self.backoff(run, key, attempt).await?;
        }
    }

    async fn with_watchdog<T>(
        &self,
        key: &StepKey,
        action: impl Future<Output = WorkerResult<T>>,
    ) -> WorkerResult<T> {
        let limit = self.settings.max_step_duration;
        match tokio::time::timeout(limit, action).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::StepTimedOut {
                step: key.to_string(),
                limit,
            }),
        }
    }

    /// Fail every attempt the watchdog abandoned, scene attempts included.
    async fn close_after_watchdog(&self, run: &JobRun<'_>, err: &WorkerError) -> WorkerResult<()> {
        let history = self.deps.history.query_by_job(&run.job.id).await?;
        let classification = classify_error(err);
        for open in RunState::replay(&history).open_attempts() {
            self.deps
                .history
                .append(failed_record(&open, err, &classification))
                .await?;
        }
        run.logger.log_error(&err.to_string());
        Ok(())
    }

    async fn backoff(&self, run: &JobRun<'_>, key: &StepKey, attempt: u32) -> WorkerResult<()> {
        let delay = self.settings.retry.delay_for_attempt(attempt);
        metrics::record_step_retry(key);
        info!(
            job_id = %run.job.id,
            step = %key,
            attempt,
            "Retrying in {:?}",
            delay
        );

        let mut cancel = run.cancel.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = wait_for_cancel(&mut cancel) => Err(WorkerError::Cancelled),
        }
    }

    /// Options for one media subprocess of this job.
    pub(crate) fn media_options(&self, run: &JobRun<'_>) -> RunOptions {
        RunOptions::new()
            .with_timeout(self.settings.media_timeout)
            .with_cancel(run.cancel.clone())
    }
}

fn failed_record(
    running: &StepRecord,
    err: &WorkerError,
    classification: &ErrorClassification,
) -> StepRecord {
    running.failed(
        err.to_string(),
        Some(classification.category),
        Some(StepPayload::Diagnostics {
            error_chain: err.chain(),
            stderr_tail: err.stderr_tail().map(str::to_string),
        }),
    )
}

