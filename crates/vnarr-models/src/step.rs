//! Major stages, sub-steps and append-only step records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ErrorCategory, JobId, SceneId, StepPayload};

/// One of the five major pipeline phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Analysis,
    Narration,
    SceneExtraction,
    AudioVideoSync,
    Compose,
}

impl StageId {
    /// All stages in execution order.
    pub const ALL: [StageId; 5] = [
        StageId::Analysis,
        StageId::Narration,
        StageId::SceneExtraction,
        StageId::AudioVideoSync,
        StageId::Compose,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Analysis => "analysis",
            StageId::Narration => "narration",
            StageId::SceneExtraction => "scene_extraction",
            StageId::AudioVideoSync => "audio_video_sync",
            StageId::Compose => "compose",
        }
    }

    /// Human-readable label for progress display.
    pub fn label(&self) -> &'static str {
        match self {
            StageId::Analysis => "Analyzing video",
            StageId::Narration => "Writing narration",
            StageId::SceneExtraction => "Extracting scenes",
            StageId::AudioVideoSync => "Syncing audio and video",
            StageId::Compose => "Composing final cut",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single unit of work within a major stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubStepId {
    ProbeInputs,
    AnalyzeVideo,
    GroupScenes,
    PlanScenes,
    GenerateScript,
    AssignNarration,
    SplitScenes,
    ReencodeOriginalAudio,
    SynthesizeAudio,
    AdjustSpeed,
    MergeAudioVideo,
    Concatenate,
    MixBackgroundMusic,
    BurnSubtitles,
}

impl SubStepId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubStepId::ProbeInputs => "probe_inputs",
            SubStepId::AnalyzeVideo => "analyze_video",
            SubStepId::GroupScenes => "group_scenes",
            SubStepId::PlanScenes => "plan_scenes",
            SubStepId::GenerateScript => "generate_script",
            SubStepId::AssignNarration => "assign_narration",
            SubStepId::SplitScenes => "split_scenes",
            SubStepId::ReencodeOriginalAudio => "reencode_original_audio",
            SubStepId::SynthesizeAudio => "synthesize_audio",
            SubStepId::AdjustSpeed => "adjust_speed",
            SubStepId::MergeAudioVideo => "merge_audio_video",
            SubStepId::Concatenate => "concatenate",
            SubStepId::MixBackgroundMusic => "mix_background_music",
            SubStepId::BurnSubtitles => "burn_subtitles",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SubStepId::ProbeInputs => "Probing input videos",
            SubStepId::AnalyzeVideo => "Detecting scenes",
            SubStepId::GroupScenes => "Grouping scenes by source video",
            SubStepId::PlanScenes => "Planning scenes",
            SubStepId::GenerateScript => "Generating script",
            SubStepId::AssignNarration => "Assigning narration to scenes",
            SubStepId::SplitScenes => "Cutting scenes",
            SubStepId::ReencodeOriginalAudio => "Re-encoding original-audio scenes",
            SubStepId::SynthesizeAudio => "Synthesizing speech",
            SubStepId::AdjustSpeed => "Adjusting scene speed",
            SubStepId::MergeAudioVideo => "Merging narration",
            SubStepId::Concatenate => "Concatenating scenes",
            SubStepId::MixBackgroundMusic => "Mixing background music",
            SubStepId::BurnSubtitles => "Burning subtitles",
        }
    }

    /// Whether the sub-step fans out over scenes.
    pub fn is_per_scene(&self) -> bool {
        matches!(
            self,
            SubStepId::SplitScenes
                | SubStepId::ReencodeOriginalAudio
                | SubStepId::SynthesizeAudio
                | SubStepId::AdjustSpeed
                | SubStepId::MergeAudioVideo
        )
    }
}

impl fmt::Display for SubStepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of one step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped)
    }

    /// Completed or skipped: never re-executed on resume.
    pub fn is_done(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of a step within a job, independent of attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepKey {
    pub stage: StageId,
    pub sub_step: SubStepId,
    pub scene_id: Option<SceneId>,
}

impl StepKey {
    pub fn job_level(stage: StageId, sub_step: SubStepId) -> Self {
        Self {
            stage,
            sub_step,
            scene_id: None,
        }
    }

    pub fn scene(stage: StageId, sub_step: SubStepId, scene_id: SceneId) -> Self {
        Self {
            stage,
            sub_step,
            scene_id: Some(scene_id),
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scene_id {
            Some(scene) => write!(f, "{}.{}[scene {}]", self.stage, self.sub_step, scene),
            None => write!(f, "{}.{}", self.stage, self.sub_step),
        }
    }
}

/// One row of step history.
///
/// History is append-only: an attempt is opened with a `running` row and
/// closed by appending a terminal row carrying the same attempt number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepRecord {
    /// Store-assigned identifier (0 until appended)
    #[serde(default)]
    pub id: u64,

    pub job_id: JobId,

    pub stage: StageId,

    pub sub_step: SubStepId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<SceneId>,

    pub status: StepStatus,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// 1-based attempt counter
    pub attempt: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<StepPayload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
}

impl StepRecord {
    /// Open a new attempt.
    pub fn running(job_id: &JobId, key: &StepKey, attempt: u32) -> Self {
        Self {
            id: 0,
            job_id: job_id.clone(),
            stage: key.stage,
            sub_step: key.sub_step,
            scene_id: key.scene_id,
            status: StepStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            attempt,
            payload: None,
            error: None,
            error_category: None,
        }
    }

    /// Close this attempt as completed.
    pub fn completed(&self, payload: StepPayload) -> Self {
        self.close(StepStatus::Completed, Some(payload))
    }

    /// Close this attempt as skipped.
    pub fn skipped(&self, payload: StepPayload) -> Self {
        self.close(StepStatus::Skipped, Some(payload))
    }

    /// Close this attempt as failed.
    pub fn failed(
        &self,
        error: impl Into<String>,
        category: Option<ErrorCategory>,
        diagnostics: Option<StepPayload>,
    ) -> Self {
        let mut record = self.close(StepStatus::Failed, diagnostics);
        record.error = Some(error.into());
        record.error_category = category;
        record
    }

    fn close(&self, status: StepStatus, payload: Option<StepPayload>) -> Self {
        Self {
            id: 0,
            status,
            completed_at: Some(Utc::now()),
            payload,
            error: None,
            error_category: None,
            ..self.clone()
        }
    }

    pub fn key(&self) -> StepKey {
        StepKey {
            stage: self.stage,
            sub_step: self.sub_step,
            scene_id: self.scene_id,
        }
    }
}
