//! Job checkpoint for fast progress queries and recovery hints.
//!
//! The checkpoint is the single mutable snapshot per job. Step history stays
//! the source of truth; the checkpoint only saves replaying it for display.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{JobId, StageId, SubStepId};

/// Current-state snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobCheckpoint {
    pub job_id: JobId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<StageId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_sub_step: Option<SubStepId>,

    #[serde(default)]
    pub total_scenes: u32,

    #[serde(default)]
    pub processed_scenes: u32,

    /// Final cut location once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<PathBuf>,

    #[serde(default)]
    pub stopped_by_user: bool,

    pub updated_at: DateTime<Utc>,
}

impl JobCheckpoint {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            current_stage: None,
            current_sub_step: None,
            total_scenes: 0,
            processed_scenes: 0,
            final_output: None,
            stopped_by_user: false,
            updated_at: Utc::now(),
        }
    }

    /// Merge a partial update into this checkpoint.
    pub fn apply(&mut self, patch: CheckpointPatch) {
        if let Some(stage) = patch.current_stage {
            self.current_stage = Some(stage);
        }
        if let Some(sub_step) = patch.current_sub_step {
            self.current_sub_step = Some(sub_step);
        }
        if let Some(total) = patch.total_scenes {
            self.total_scenes = total;
        }
        if let Some(processed) = patch.processed_scenes {
            self.processed_scenes = processed;
        }
        if let Some(output) = patch.final_output {
            self.final_output = Some(output);
        }
        if let Some(stopped) = patch.stopped_by_user {
            self.stopped_by_user = stopped;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial checkpoint update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPatch {
    pub current_stage: Option<StageId>,
    pub current_sub_step: Option<SubStepId>,
    pub total_scenes: Option<u32>,
    pub processed_scenes: Option<u32>,
    pub final_output: Option<PathBuf>,
    pub stopped_by_user: Option<bool>,
}

impl CheckpointPatch {
    pub fn position(stage: StageId, sub_step: SubStepId) -> Self {
        Self {
            current_stage: Some(stage),
            current_sub_step: Some(sub_step),
            ..Default::default()
        }
    }

    pub fn with_scenes(mut self, processed: u32, total: u32) -> Self {
        self.processed_scenes = Some(processed);
        self.total_scenes = Some(total);
        self
    }

    pub fn with_final_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.final_output = Some(path.into());
        self
    }

    pub fn stopped() -> Self {
        Self {
            stopped_by_user: Some(true),
            ..Default::default()
        }
    }
}
