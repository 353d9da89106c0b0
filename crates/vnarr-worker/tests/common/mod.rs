//! Fake collaborators for driving the workflow executor without FFmpeg or
//! an AI service.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::watch;

use vnarr_ai::{
    AiResult, AnalysisVideo, AnalyzedScene, NarrationWriter, SceneAnalyzer, SpeechSynthesizer,
    SynthesizedAudio,
};
use vnarr_media::{MediaError, MediaInfo, MediaResult, MediaToolkit, MergeRequest, RunOptions, SplitRequest};
use vnarr_models::{
    InputVideo, Job, OutputFormat, SceneFailurePolicy, SceneId, SceneTask, VoiceConfig,
    WorkflowSpec,
};
use vnarr_store::InMemoryStore;
use vnarr_worker::{RetryPolicy, WorkflowDeps, WorkflowExecutor, WorkflowSettings};

/// Length of every input video.
pub const INPUT_SECS: f64 = 60.0;

/// Records every call and answers from fixed durations.
#[derive(Default)]
pub struct FakeMedia {
    calls: Mutex<Vec<String>>,
    durations: Mutex<HashMap<PathBuf, f64>>,
    failing_merges: Mutex<HashSet<SceneId>>,
    cancel_on_split: Mutex<Option<watch::Sender<bool>>>,
    probe_delay: Mutex<Option<Duration>>,
}

impl FakeMedia {
    /// Make every merge of `scene` time out.
    pub fn fail_merge(&self, scene: SceneId) {
        self.failing_merges.lock().unwrap().insert(scene);
    }

    pub fn heal_merges(&self) {
        self.failing_merges.lock().unwrap().clear();
    }

    /// Fire `cancel` from inside the first split.
    pub fn cancel_on_split(&self, cancel: watch::Sender<bool>) {
        *self.cancel_on_split.lock().unwrap() = Some(cancel);
    }

    /// Report `secs` when `path` is probed.
    pub fn set_duration(&self, path: impl Into<PathBuf>, secs: f64) {
        self.durations.lock().unwrap().insert(path.into(), secs);
    }

    pub fn delay_probes(&self, delay: Duration) {
        *self.probe_delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose operation name is `op`.
    pub fn calls_to(&self, op: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .collect()
    }

    fn log(&self, op: &str, path: &Path) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.calls.lock().unwrap().push(format!("{} {}", op, name));
    }

    fn remember(&self, path: &Path, duration: f64) {
        self.durations
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), duration);
    }
}

#[async_trait]
impl MediaToolkit for FakeMedia {
    async fn probe(&self, path: &Path, _opts: RunOptions) -> MediaResult<MediaInfo> {
        let delay = *self.probe_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.log("probe", path);
        let duration = self
            .durations
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(INPUT_SECS);
        Ok(MediaInfo {
            duration,
            width: 1920,
            height: 1080,
            fps: 30.0,
            codec: "h264".to_string(),
            has_audio: true,
            size: 1_000_000,
            bitrate: 2_000_000,
        })
    }

    async fn split(&self, request: &SplitRequest, _opts: RunOptions) -> MediaResult<PathBuf> {
        self.log("split", &request.output);
        self.remember(&request.output, request.duration);
        if let Some(cancel) = self.cancel_on_split.lock().unwrap().take() {
            cancel.send(true).ok();
        }
        Ok(request.output.clone())
    }

    async fn reencode_original_audio(
        &self,
        _input: &Path,
        output: &Path,
        _opts: RunOptions,
    ) -> MediaResult<PathBuf> {
        self.log("reencode", output);
        Ok(output.to_path_buf())
    }

    async fn adjust_speed(
        &self,
        _input: &Path,
        _factor: f64,
        output: &Path,
        _format: &OutputFormat,
        _opts: RunOptions,
    ) -> MediaResult<PathBuf> {
        self.log("speed", output);
        Ok(output.to_path_buf())
    }

    async fn merge(&self, request: &MergeRequest, _opts: RunOptions) -> MediaResult<PathBuf> {
        self.log("merge", &request.output);
        let failing = self.failing_merges.lock().unwrap().clone();
        let name = request
            .output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if failing
            .iter()
            .any(|id| name.starts_with(&format!("scene_{:03}_", id)))
        {
            return Err(MediaError::Timeout(Duration::from_secs(900)));
        }
        Ok(request.output.clone())
    }

    async fn concatenate(
        &self,
        clips: &[PathBuf],
        output: &Path,
        _opts: RunOptions,
    ) -> MediaResult<PathBuf> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("concat {}", clips.len()));
        Ok(output.to_path_buf())
    }

    async fn loop_to_duration(
        &self,
        _input: &Path,
        duration: f64,
        output: &Path,
        _opts: RunOptions,
    ) -> MediaResult<PathBuf> {
        self.log("loop", output);
        self.remember(output, duration);
        Ok(output.to_path_buf())
    }

    async fn mix_background(
        &self,
        _video: &Path,
        _music: &Path,
        _volume: f64,
        output: &Path,
        _opts: RunOptions,
    ) -> MediaResult<PathBuf> {
        self.log("mix", output);
        Ok(output.to_path_buf())
    }

    async fn burn_subtitles(
        &self,
        _video: &Path,
        _subtitles: &Path,
        output: &Path,
        _format: &OutputFormat,
        _opts: RunOptions,
    ) -> MediaResult<PathBuf> {
        self.log("burn", output);
        Ok(output.to_path_buf())
    }
}

/// Analyzer, script writer and synthesizer in one.
pub struct FakeAi {
    scenes: Vec<AnalyzedScene>,
    /// Duration reported for every synthesized take
    pub audio_secs: f64,
    analyze_calls: Mutex<usize>,
    script_calls: Mutex<usize>,
}

impl FakeAi {
    pub fn new(scenes: Vec<AnalyzedScene>) -> Self {
        Self {
            scenes,
            audio_secs: 5.0,
            analyze_calls: Mutex::new(0),
            script_calls: Mutex::new(0),
        }
    }

    pub fn analyze_calls(&self) -> usize {
        *self.analyze_calls.lock().unwrap()
    }

    pub fn script_calls(&self) -> usize {
        *self.script_calls.lock().unwrap()
    }
}

#[async_trait]
impl SceneAnalyzer for FakeAi {
    async fn analyze(
        &self,
        _videos: &[AnalysisVideo],
        _spec: &WorkflowSpec,
    ) -> AiResult<Vec<AnalyzedScene>> {
        *self.analyze_calls.lock().unwrap() += 1;
        Ok(self.scenes.clone())
    }
}

#[async_trait]
impl NarrationWriter for FakeAi {
    async fn write_script(
        &self,
        scenes: &[SceneTask],
        _outline: Option<&str>,
    ) -> AiResult<Vec<String>> {
        *self.script_calls.lock().unwrap() += 1;
        Ok(scenes
            .iter()
            .map(|s| format!("Narration for scene {}.", s.id))
            .collect())
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeAi {
    async fn synthesize(
        &self,
        _text: &str,
        _voice: &VoiceConfig,
        out_path: &Path,
    ) -> AiResult<SynthesizedAudio> {
        Ok(SynthesizedAudio {
            path: out_path.to_path_buf(),
            duration: Some(self.audio_secs),
        })
    }
}

pub fn scene(source_index: usize, start: &str, end: &str) -> AnalyzedScene {
    AnalyzedScene {
        source_index,
        start: start.to_string(),
        end: end.to_string(),
        description: format!("video {} from {}", source_index, start),
        keep_original_audio: false,
    }
}

/// Two scenes from each of two videos; scene 3 is the first from video 2.
pub fn four_scenes() -> Vec<AnalyzedScene> {
    vec![
        scene(0, "00:00", "00:04"),
        scene(0, "00:10", "00:14"),
        scene(1, "00:00", "00:04"),
        scene(1, "00:20", "00:24"),
    ]
}

pub fn two_video_job(policy: SceneFailurePolicy) -> Job {
    let mut spec = WorkflowSpec::new(policy);
    spec.max_concurrent_scenes = 2;
    Job::new(
        vec![InputVideo::new("/in/a.mp4"), InputVideo::new("/in/b.mp4")],
        spec,
    )
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub media: Arc<FakeMedia>,
    pub ai: Arc<FakeAi>,
    pub settings: WorkflowSettings,
    _work_dir: TempDir,
}

impl Harness {
    pub fn new(scenes: Vec<AnalyzedScene>) -> Self {
        Self::with_ai(FakeAi::new(scenes))
    }

    pub fn with_ai(ai: FakeAi) -> Self {
        let work_dir = TempDir::new().unwrap();
        let settings = WorkflowSettings {
            work_dir: work_dir.path().to_path_buf(),
            retry: RetryPolicy::default()
                .with_max_attempts(2)
                .with_base_delay(Duration::from_millis(1)),
            max_step_duration: Duration::from_secs(30),
            media_timeout: Duration::from_secs(30),
            max_scene_parallel: 5,
        };
        Self {
            store: Arc::new(InMemoryStore::new()),
            media: Arc::new(FakeMedia::default()),
            ai: Arc::new(ai),
            settings,
            _work_dir: work_dir,
        }
    }

    pub fn workflow(&self) -> WorkflowExecutor {
        let deps = WorkflowDeps {
            history: self.store.clone(),
            checkpoints: self.store.clone(),
            jobs: self.store.clone(),
            analyzer: self.ai.clone(),
            writer: self.ai.clone(),
            synthesizer: self.ai.clone(),
            media: self.media.clone(),
        };
        WorkflowExecutor::new(deps, self.settings.clone())
    }
}
