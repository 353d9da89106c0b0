//! Scene tasks: the unit of per-scene fan-out work.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Scene identifier, unique within a job.
pub type SceneId = u32;

/// Terminal state of a scene inside the per-scene pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SceneStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Skipped,
}

/// Mutable result accumulated by the per-scene sub-steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SceneResult {
    #[serde(default)]
    pub status: SceneStatus,

    /// Normalized clip cut from the source video
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_path: Option<PathBuf>,

    /// Measured duration of the cut clip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_duration: Option<f64>,

    /// Selected narration audio candidate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<f64>,

    /// Playback rate applied to the clip so it spans the narration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_factor: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_path: Option<PathBuf>,

    /// Final per-scene output that goes into the concat list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A bounded segment of a source video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SceneTask {
    pub id: SceneId,

    /// Index into the job's input videos
    #[serde(default)]
    pub source_index: usize,

    pub start_secs: f64,

    pub end_secs: f64,

    /// Keep the source audio; bypasses speech synthesis and audio merge
    #[serde(default)]
    pub keep_original_audio: bool,

    /// Short description produced by the analyzer
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub narration: String,

    #[serde(default)]
    pub result: SceneResult,
}

impl SceneTask {
    pub fn new(id: SceneId, source_index: usize, start_secs: f64, end_secs: f64) -> Self {
        Self {
            id,
            source_index,
            start_secs,
            end_secs,
            keep_original_audio: false,
            description: String::new(),
            narration: String::new(),
            result: SceneResult::default(),
        }
    }

    /// Source segment length in seconds.
    pub fn duration(&self) -> f64 {
        (self.end_secs - self.start_secs).max(0.0)
    }

    pub fn is_failed(&self) -> bool {
        self.result.status == SceneStatus::Failed
    }

    /// Whether the scene needs narration synthesized and merged.
    pub fn needs_narration(&self) -> bool {
        !self.keep_original_audio && !self.narration.trim().is_empty()
    }

    /// The most processed artifact produced for this scene so far.
    pub fn latest_artifact(&self) -> Option<&Path> {
        self.result
            .output_path
            .as_deref()
            .or(self.result.adjusted_path.as_deref())
            .or(self.result.clip_path.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_artifact_prefers_output() {
        let mut scene = SceneTask::new(1, 0, 2.0, 8.5);
        assert!((scene.duration() - 6.5).abs() < 1e-9);
        assert!(scene.latest_artifact().is_none());

        scene.result.clip_path = Some(PathBuf::from("clip.mp4"));
        assert_eq!(scene.latest_artifact(), Some(Path::new("clip.mp4")));

        scene.result.output_path = Some(PathBuf::from("merged.mp4"));
        assert_eq!(scene.latest_artifact(), Some(Path::new("merged.mp4")));
    }

    #[test]
    fn test_needs_narration() {
        let mut scene = SceneTask::new(1, 0, 0.0, 3.0);
        assert!(!scene.needs_narration());
        scene.narration = "Here the hero arrives.".into();
        assert!(scene.needs_narration());
        scene.keep_original_audio = true;
        assert!(!scene.needs_narration());
    }
}
