//! Shared runner for media binaries with timeout, cancellation and
//! progress tracking.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::progress::{is_progress_line, parse_progress_line, FfmpegProgress, ProgressCallback};

/// Diagnostic lines kept from the error stream.
const STDERR_TAIL_LINES: usize = 40;

/// How long to wait for the pipe readers once the child is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Per-invocation controls.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Kill the process after this long
    pub timeout: Option<Duration>,
    /// Kill the process once this flips to `true`
    pub cancel: Option<watch::Receiver<bool>>,
    /// Receives a snapshot at the end of every `-progress` block
    pub on_progress: Option<ProgressCallback>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("timeout", &self.timeout)
            .field("cancel", &self.cancel.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Why an invocation did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaFailure {
    /// Killed after exceeding its timeout
    TimedOut(Duration),
    /// Killed because the cancel signal fired
    Cancelled,
    /// The binary ran and exited non-zero
    ExitStatus { code: Option<i32> },
    /// The binary is not installed
    NotFound(String),
    /// Spawning or waiting failed
    Spawn(String),
}

impl MediaFailure {
    /// Timed out or cancelled, as opposed to a binary-reported error.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, MediaFailure::TimedOut(_) | MediaFailure::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFailure::TimedOut(_) => "timed_out",
            MediaFailure::Cancelled => "cancelled",
            MediaFailure::ExitStatus { .. } => "exit_status",
            MediaFailure::NotFound(_) => "not_found",
            MediaFailure::Spawn(_) => "spawn",
        }
    }
}

/// Outcome of one media binary invocation.
#[derive(Debug, Clone)]
pub struct MediaOperationResult {
    pub success: bool,
    /// Files the invocation was asked to produce
    pub outputs: Vec<PathBuf>,
    /// Last diagnostic lines from the error stream
    pub stderr_tail: String,
    /// Captured standard output (used by probe)
    pub stdout: Vec<u8>,
    /// Wall-clock duration
    pub duration: Duration,
    pub failure: Option<MediaFailure>,
}

impl MediaOperationResult {
    fn failed(failure: MediaFailure, duration: Duration) -> Self {
        Self {
            success: false,
            outputs: Vec::new(),
            stderr_tail: String::new(),
            stdout: Vec::new(),
            duration,
            failure: Some(failure),
        }
    }

    /// Last non-empty diagnostic line.
    pub fn last_diagnostic(&self) -> Option<&str> {
        self.stderr_tail.lines().rev().find(|l| !l.trim().is_empty())
    }

    /// Convert a failed invocation into a [`MediaError`].
    pub fn into_result(self) -> MediaResult<Self> {
        let Some(failure) = self.failure.clone() else {
            return Ok(self);
        };

        Err(match failure {
            MediaFailure::TimedOut(after) => MediaError::Timeout(after),
            MediaFailure::Cancelled => MediaError::Cancelled,
            MediaFailure::NotFound(binary) => MediaError::BinaryNotFound(binary),
            MediaFailure::Spawn(message) => {
                MediaError::ffmpeg_failed(format!("failed to run media binary: {}", message), None, None)
            }
            MediaFailure::ExitStatus { code } => {
                let status = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                let message = match self.last_diagnostic() {
                    Some(line) => format!("exit status {}: {}", status, line.trim()),
                    None => format!("exit status {}", status),
                };
                let stderr = (!self.stderr_tail.is_empty()).then(|| self.stderr_tail.clone());
                MediaError::ffmpeg_failed(message, stderr, code)
            }
        })
    }
}

/// Runner for a media binary (FFmpeg, FFprobe, or a test stand-in).
#[derive(Debug, Clone)]
pub struct MediaRunner {
    binary: PathBuf,
    default_timeout: Option<Duration>,
}

impl MediaRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            default_timeout: None,
        }
    }

    pub fn ffmpeg() -> Self {
        Self::new("ffmpeg")
    }

    pub fn ffprobe() -> Self {
        Self::new("ffprobe")
    }

    /// Timeout applied when an invocation does not set its own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run an FFmpeg command; failures become errors.
    pub async fn run_command(
        &self,
        cmd: &FfmpegCommand,
        opts: RunOptions,
    ) -> MediaResult<MediaOperationResult> {
        let mut result = self.run(&cmd.build_args(), opts).await;
        result.outputs = vec![cmd.output_path().to_path_buf()];
        result.into_result()
    }

    /// Run the binary with an argument vector.
    ///
    /// Never returns an error: every outcome, including spawn failures, is
    /// reported through [`MediaOperationResult::failure`].
    pub async fn run(&self, args: &[String], opts: RunOptions) -> MediaOperationResult {
        let started = Instant::now();
        let timeout = opts.timeout.or(self.default_timeout);
        let name = self
            .binary
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.binary.display().to_string());

        if opts.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return MediaOperationResult::failed(MediaFailure::Cancelled, started.elapsed());
        }

        let Ok(binary) = which::which(&self.binary) else {
            return MediaOperationResult::failed(
                MediaFailure::NotFound(self.binary.display().to_string()),
                started.elapsed(),
            );
        };

        debug!("Running {}: {} {}", name, binary.display(), args.join(" "));

        let mut child = match Command::new(&binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return MediaOperationResult::failed(MediaFailure::Spawn(e.to_string()), started.elapsed())
            }
        };

        let stderr_task = child.stderr.take().map(|stderr| {
            let on_progress = opts.on_progress.clone();
            tokio::spawn(read_stderr(stderr, on_progress))
        });
        let stdout_task = child.stdout.take().map(|mut stdout| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stdout.read_to_end(&mut buf).await;
                buf
            })
        });

        let outcome = wait_with_limits(&mut child, timeout, opts.cancel.clone()).await;

        let stderr_tail = match stderr_task {
            Some(task) => tokio::time::timeout(READER_GRACE, task)
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default(),
            None => String::new(),
        };
        let stdout = match stdout_task {
            Some(task) => tokio::time::timeout(READER_GRACE, task)
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let failure = match outcome {
            WaitOutcome::Exited(status) if status.success() => None,
            WaitOutcome::Exited(status) => Some(MediaFailure::ExitStatus { code: status.code() }),
            WaitOutcome::TimedOut(after) => Some(MediaFailure::TimedOut(after)),
            WaitOutcome::Cancelled => Some(MediaFailure::Cancelled),
            WaitOutcome::WaitFailed(e) => Some(MediaFailure::Spawn(e.to_string())),
        };

        let duration = started.elapsed();
        let outcome_label = failure.as_ref().map_or("success", MediaFailure::as_str);
        histogram!("vnarr_media_operation_duration_seconds", "binary" => name.clone(), "outcome" => outcome_label)
            .record(duration.as_secs_f64());

        match &failure {
            None => {}
            Some(MediaFailure::TimedOut(after)) => {
                warn!("{} timed out after {:?}, process killed", name, after);
                counter!("vnarr_media_timeouts_total", "binary" => name.clone()).increment(1);
            }
            Some(MediaFailure::Cancelled) => info!("{} cancelled, process killed", name),
            Some(other) => debug!("{} failed: {:?}", name, other),
        }

        MediaOperationResult {
            success: failure.is_none(),
            outputs: Vec::new(),
            stderr_tail,
            stdout,
            duration,
            failure,
        }
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut(Duration),
    Cancelled,
    WaitFailed(std::io::Error),
}

/// Wait for the child, killing it on timeout or cancellation.
async fn wait_with_limits(
    child: &mut Child,
    timeout: Option<Duration>,
    cancel: Option<watch::Receiver<bool>>,
) -> WaitOutcome {
    let outcome = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => WaitOutcome::Exited(status),
            Err(e) => WaitOutcome::WaitFailed(e),
        },
        after = deadline(timeout) => WaitOutcome::TimedOut(after),
        _ = cancelled(cancel) => WaitOutcome::Cancelled,
    };

    if matches!(outcome, WaitOutcome::TimedOut(_) | WaitOutcome::Cancelled) {
        let _ = child.kill().await;
    }

    outcome
}

async fn deadline(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(after) => {
            tokio::time::sleep(after).await;
            after
        }
        None => std::future::pending().await,
    }
}

/// Resolves once the cancel signal reads `true`; never if there is none or
/// the sender is gone.
pub(crate) async fn cancelled(cancel: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = cancel else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Split the error stream into progress blocks and diagnostics.
async fn read_stderr(stderr: ChildStderr, on_progress: Option<ProgressCallback>) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut current = FfmpegProgress::default();

    while let Ok(Some(line)) = lines.next_line().await {
        if is_progress_line(&line) {
            if let Some(snapshot) = parse_progress_line(&line, &mut current) {
                if let Some(callback) = &on_progress {
                    callback(snapshot);
                }
            }
            continue;
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    Vec::from(tail).join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_success_and_exit_status() {
        let ok = MediaRunner::new("true").run(&[], RunOptions::new()).await;
        assert!(ok.success);
        assert!(ok.failure.is_none());

        let failed = MediaRunner::new("false").run(&[], RunOptions::new()).await;
        assert!(!failed.success);
        assert_eq!(failed.failure, Some(MediaFailure::ExitStatus { code: Some(1) }));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let started = Instant::now();
        let result = MediaRunner::new("sleep")
            .run(&args(&["5"]), RunOptions::new().with_timeout(Duration::from_millis(100)))
            .await;

        assert!(matches!(result.failure, Some(MediaFailure::TimedOut(_))));
        assert!(started.elapsed() < Duration::from_secs(4));

        let err = result.into_result().unwrap_err();
        assert!(err.is_interrupted());
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_default_timeout_applies() {
        let result = MediaRunner::new("sleep")
            .with_default_timeout(Duration::from_millis(50))
            .run(&args(&["5"]), RunOptions::new())
            .await;
        assert!(matches!(result.failure, Some(MediaFailure::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
        });

        let started = Instant::now();
        let result = MediaRunner::new("sleep")
            .run(&args(&["5"]), RunOptions::new().with_cancel(rx))
            .await;

        assert_eq!(result.failure, Some(MediaFailure::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(matches!(result.into_result(), Err(MediaError::Cancelled)));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_spawns() {
        let (_tx, rx) = watch::channel(true);
        let result = MediaRunner::new("sleep")
            .run(&args(&["5"]), RunOptions::new().with_cancel(rx))
            .await;
        assert_eq!(result.failure, Some(MediaFailure::Cancelled));
        assert!(result.duration < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_stderr_split_into_progress_and_diagnostics() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |p: FfmpegProgress| {
            assert!(p.is_complete);
            seen_cb.fetch_add(1, Ordering::SeqCst);
        });

        let script = "echo 'Invalid data found when processing input' >&2; \
                      echo 'out_time_us=1000000' >&2; echo 'progress=end' >&2; exit 3";
        let result = MediaRunner::new("sh")
            .run(&args(&["-c", script]), RunOptions::new().with_progress(callback))
            .await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(result.failure, Some(MediaFailure::ExitStatus { code: Some(3) }));
        assert!(result.stderr_tail.contains("Invalid data found"));
        assert!(!result.stderr_tail.contains("progress=end"));

        match result.into_result() {
            Err(MediaError::FfmpegFailed { message, stderr, exit_code }) => {
                assert_eq!(exit_code, Some(3));
                assert!(message.contains("Invalid data found"));
                assert!(stderr.is_some());
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_reported() {
        let result = MediaRunner::new("vnarr-no-such-binary")
            .run(&[], RunOptions::new())
            .await;
        assert!(matches!(result.failure, Some(MediaFailure::NotFound(_))));
        assert!(matches!(result.into_result(), Err(MediaError::BinaryNotFound(_))));
    }
}
