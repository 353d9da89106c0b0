//! Workflow specification: the per-job style and pipeline configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Maximum number of input videos per job.
pub const MAX_INPUT_VIDEOS: usize = 5;

/// System-wide hard cap on per-job scene parallelism.
pub const MAX_SCENE_CONCURRENCY: usize = 5;

/// Default output width
pub const DEFAULT_OUTPUT_WIDTH: u32 = 1280;
/// Default output height
pub const DEFAULT_OUTPUT_HEIGHT: u32 = 720;
/// Default output frame rate
pub const DEFAULT_OUTPUT_FPS: u32 = 30;

/// What to do when individual scenes fail irrecoverably inside a fan-out.
///
/// Deliberately has no default: every workflow spec states it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SceneFailurePolicy {
    /// One failed scene fails the whole job
    FailJob,
    /// Failed scenes are recorded and dropped; compose uses the survivors
    BestEffort,
}

/// Publishing target. Short-form platforms get burned-in captions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetPlatform {
    #[default]
    Generic,
    Youtube,
    Tiktok,
    Douyin,
}

impl TargetPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetPlatform::Generic => "generic",
            TargetPlatform::Youtube => "youtube",
            TargetPlatform::Tiktok => "tiktok",
            TargetPlatform::Douyin => "douyin",
        }
    }

    /// Whether the final cut gets subtitles rendered into the picture.
    pub fn burns_captions(&self) -> bool {
        matches!(self, TargetPlatform::Tiktok | TargetPlatform::Douyin)
    }
}

/// Speech synthesis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VoiceConfig {
    /// Voice identifier understood by the speech service
    #[serde(default = "default_voice_id")]
    pub voice_id: String,

    /// Speaking rate multiplier
    #[serde(default = "default_voice_speed")]
    pub speed: f32,

    /// Number of takes to synthesize per scene; the take closest to the
    /// scene length is selected
    #[serde(default = "default_candidates")]
    pub candidates: u32,
}

fn default_voice_id() -> String {
    "default".to_string()
}
fn default_voice_speed() -> f32 {
    1.0
}
fn default_candidates() -> u32 {
    1
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_id: default_voice_id(),
            speed: default_voice_speed(),
            candidates: default_candidates(),
        }
    }
}

/// Normalized output target every scene is re-encoded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OutputFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            width: DEFAULT_OUTPUT_WIDTH,
            height: DEFAULT_OUTPUT_HEIGHT,
            fps: DEFAULT_OUTPUT_FPS,
        }
    }
}

/// Per-job workflow configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowSpec {
    /// Scenes processed in parallel inside a fan-out sub-step (1-5)
    #[serde(default = "default_max_concurrent_scenes")]
    pub max_concurrent_scenes: usize,

    /// Number of scenes the analyzer is asked for
    #[serde(default = "default_target_scene_count")]
    pub target_scene_count: u32,

    /// Optional outline the script writer follows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_outline: Option<String>,

    /// Optional background music track
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_music: Option<PathBuf>,

    /// Background music gain relative to narration
    #[serde(default = "default_music_volume")]
    pub background_music_volume: f32,

    #[serde(default)]
    pub target_platform: TargetPlatform,

    #[serde(default)]
    pub voice: VoiceConfig,

    #[serde(default)]
    pub output: OutputFormat,

    pub scene_failure_policy: SceneFailurePolicy,
}

fn default_max_concurrent_scenes() -> usize {
    2
}
fn default_target_scene_count() -> u32 {
    8
}
fn default_music_volume() -> f32 {
    0.15
}

/// Workflow specification validation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpecError {
    #[error("invalid input: job needs between 1 and {max} videos, got {got}")]
    VideoCount { got: usize, max: usize },

    #[error("invalid input: max_concurrent_scenes must be between 1 and {max}, got {got}")]
    SceneConcurrency { got: usize, max: usize },

    #[error("invalid input: target_scene_count must be positive")]
    SceneCount,

    #[error("invalid input: output format {width}x{height}@{fps} is not usable")]
    OutputFormat { width: u32, height: u32, fps: u32 },

    #[error("invalid input: voice candidates must be between 1 and 5, got {0}")]
    VoiceCandidates(u32),
}

impl WorkflowSpec {
    /// Create a spec with defaults and the given failure policy.
    pub fn new(scene_failure_policy: SceneFailurePolicy) -> Self {
        Self {
            max_concurrent_scenes: default_max_concurrent_scenes(),
            target_scene_count: default_target_scene_count(),
            script_outline: None,
            background_music: None,
            background_music_volume: default_music_volume(),
            target_platform: TargetPlatform::default(),
            voice: VoiceConfig::default(),
            output: OutputFormat::default(),
            scene_failure_policy,
        }
    }

    /// Check the spec against the job it is attached to.
    pub fn validate(&self, video_count: usize) -> Result<(), SpecError> {
        if video_count == 0 || video_count > MAX_INPUT_VIDEOS {
            return Err(SpecError::VideoCount {
                got: video_count,
                max: MAX_INPUT_VIDEOS,
            });
        }
        if self.max_concurrent_scenes == 0 || self.max_concurrent_scenes > MAX_SCENE_CONCURRENCY {
            return Err(SpecError::SceneConcurrency {
                got: self.max_concurrent_scenes,
                max: MAX_SCENE_CONCURRENCY,
            });
        }
        if self.target_scene_count == 0 {
            return Err(SpecError::SceneCount);
        }
        let OutputFormat { width, height, fps } = self.output;
        // libx264 needs even dimensions
        if width == 0 || height == 0 || fps == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(SpecError::OutputFormat { width, height, fps });
        }
        if self.voice.candidates == 0 || self.voice.candidates > 5 {
            return Err(SpecError::VoiceCandidates(self.voice.candidates));
        }
        Ok(())
    }

    /// Scene parallelism clamped to the system-wide cap.
    pub fn scene_concurrency(&self) -> usize {
        self.max_concurrent_scenes.clamp(1, MAX_SCENE_CONCURRENCY)
    }
}
