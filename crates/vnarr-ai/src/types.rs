//! Request and response types shared by the AI traits.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use vnarr_models::timestamp::{parse_timestamp, validate_bounds, SceneBounds, TimestampError};
use vnarr_models::{SceneId, SceneTask};

/// One input video handed to the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisVideo {
    pub index: usize,
    pub path: PathBuf,
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Scene proposed by the analyzer. Bounds arrive as timestamp strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedScene {
    #[serde(default)]
    pub source_index: usize,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keep_original_audio: bool,
}

impl AnalyzedScene {
    /// Parse and validate the bounds against the source length.
    pub fn bounds(&self, video_duration: Option<f64>) -> Result<SceneBounds, TimestampError> {
        let start = parse_timestamp(&self.start)?;
        let end = parse_timestamp(&self.end)?;
        validate_bounds(start, end, video_duration)
    }

    /// Build the scene task with id `id`.
    pub fn to_scene_task(
        &self,
        id: SceneId,
        video_duration: Option<f64>,
    ) -> Result<SceneTask, TimestampError> {
        let bounds = self.bounds(video_duration)?;
        let mut scene = SceneTask::new(id, self.source_index, bounds.start_secs, bounds.end_secs);
        scene.keep_original_audio = self.keep_original_audio;
        scene.description = self.description.clone();
        Ok(scene)
    }
}

/// Narration audio written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedAudio {
    pub path: PathBuf,
    /// Length reported by the synthesizer, when it reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}
