//! Typed step payloads.
//!
//! Every sub-step has its own payload variant, so outputs written to the
//! step history can be replayed into run state after a restart without
//! guessing at untyped JSON.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{SceneId, SceneTask, SubStepId};

/// Probe summary of one input video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProbedInput {
    pub index: usize,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub has_audio: bool,
}

/// Narration text bound to one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NarrationAssignment {
    pub scene_id: SceneId,
    pub narration: String,
}

/// Structured input/output attached to a step record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepPayload {
    InputsProbed {
        inputs: Vec<ProbedInput>,
    },
    ScenesAnalyzed {
        scenes: Vec<SceneTask>,
    },
    ScenesGrouped {
        /// Scene ids per source video, in playback order
        groups: Vec<Vec<SceneId>>,
    },
    ScenePlan {
        scenes: Vec<SceneTask>,
    },
    ScriptGenerated {
        lines: Vec<String>,
    },
    NarrationAssigned {
        assignments: Vec<NarrationAssignment>,
    },
    SceneSplit {
        clip_path: PathBuf,
        duration: f64,
    },
    SceneReencoded {
        clip_path: PathBuf,
    },
    AudioSynthesized {
        audio_path: PathBuf,
        duration: f64,
        candidates: u32,
    },
    SpeedAdjusted {
        adjusted_path: PathBuf,
        speed_factor: f64,
    },
    SceneMerged {
        output_path: PathBuf,
    },
    Concatenated {
        output_path: PathBuf,
        scene_count: usize,
    },
    MusicMixed {
        output_path: PathBuf,
    },
    SubtitlesBurned {
        output_path: PathBuf,
        subtitle_path: PathBuf,
    },
    /// Outcome of a per-scene fan-out, on its job-level record
    ScenesProcessed {
        processed: Vec<SceneId>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        failed: Vec<SceneId>,
    },
    /// Precondition did not apply
    NotApplicable {
        reason: String,
    },
    /// Failure details for a failed attempt; never shown on the job record
    Diagnostics {
        error_chain: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr_tail: Option<String>,
    },
}

impl StepPayload {
    pub fn not_applicable(reason: impl Into<String>) -> Self {
        Self::NotApplicable {
            reason: reason.into(),
        }
    }

    /// The sub-step whose output this variant describes, if it is an output.
    pub fn sub_step(&self) -> Option<SubStepId> {
        Some(match self {
            StepPayload::InputsProbed { .. } => SubStepId::ProbeInputs,
            StepPayload::ScenesAnalyzed { .. } => SubStepId::AnalyzeVideo,
            StepPayload::ScenesGrouped { .. } => SubStepId::GroupScenes,
            StepPayload::ScenePlan { .. } => SubStepId::PlanScenes,
            StepPayload::ScriptGenerated { .. } => SubStepId::GenerateScript,
            StepPayload::NarrationAssigned { .. } => SubStepId::AssignNarration,
            StepPayload::SceneSplit { .. } => SubStepId::SplitScenes,
            StepPayload::SceneReencoded { .. } => SubStepId::ReencodeOriginalAudio,
            StepPayload::AudioSynthesized { .. } => SubStepId::SynthesizeAudio,
            StepPayload::SpeedAdjusted { .. } => SubStepId::AdjustSpeed,
            StepPayload::SceneMerged { .. } => SubStepId::MergeAudioVideo,
            StepPayload::Concatenated { .. } => SubStepId::Concatenate,
            StepPayload::MusicMixed { .. } => SubStepId::MixBackgroundMusic,
            StepPayload::SubtitlesBurned { .. } => SubStepId::BurnSubtitles,
            StepPayload::ScenesProcessed { .. }
            | StepPayload::NotApplicable { .. }
            | StepPayload::Diagnostics { .. } => return None,
        })
    }

    /// Whether this payload may be attached to a record of `sub_step`.
    pub fn fits(&self, sub_step: SubStepId) -> bool {
        match self.sub_step() {
            Some(owner) => owner == sub_step,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_tagging() {
        let payload = StepPayload::SpeedAdjusted {
            adjusted_path: PathBuf::from("/w/scene_1_speed.mp4"),
            speed_factor: 1.25,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "speed_adjusted");
        assert_eq!(json["speed_factor"], 1.25);
    }

    #[test]
    fn test_payload_fits_sub_step() {
        let merged = StepPayload::SceneMerged {
            output_path: PathBuf::from("/w/out.mp4"),
        };
        assert!(merged.fits(SubStepId::MergeAudioVideo));
        assert!(!merged.fits(SubStepId::Concatenate));
        assert!(StepPayload::not_applicable("no music").fits(SubStepId::MixBackgroundMusic));
    }
}
