//! Contracts the workflow executor consumes.

use async_trait::async_trait;
use std::path::Path;

use vnarr_models::{SceneTask, VoiceConfig, WorkflowSpec};

use crate::error::AiResult;
use crate::types::{AnalysisVideo, AnalyzedScene, SynthesizedAudio};

/// Proposes scenes for a set of input videos.
#[async_trait]
pub trait SceneAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        videos: &[AnalysisVideo],
        spec: &WorkflowSpec,
    ) -> AiResult<Vec<AnalyzedScene>>;
}

/// Writes narration, one line per scene in input order.
#[async_trait]
pub trait NarrationWriter: Send + Sync {
    async fn write_script(
        &self,
        scenes: &[SceneTask],
        outline: Option<&str>,
    ) -> AiResult<Vec<String>>;
}

/// Turns narration text into an audio file at `out_path`.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
        out_path: &Path,
    ) -> AiResult<SynthesizedAudio>;
}
