//! Run state rebuilt from step history.
//!
//! The executor never keeps pipeline state anywhere but the history: on start
//! it replays every record, and while running it applies each record it
//! appends, so a resumed job sees exactly what an uninterrupted one would.

use std::collections::HashMap;
use std::path::PathBuf;

use vnarr_models::{
    ProbedInput, SceneId, SceneStatus, SceneTask, StepKey, StepPayload, StepRecord, StepStatus,
    SubStepId,
};

/// Pipeline state derived from completed step payloads.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub inputs: Vec<ProbedInput>,
    /// Raw analyzer output, before grouping and planning
    pub analyzed: Vec<SceneTask>,
    pub groups: Vec<Vec<SceneId>>,
    /// The scene plan, in playback order
    pub scenes: Vec<SceneTask>,
    pub script: Vec<String>,
    pub final_output: Option<PathBuf>,
    history: Vec<StepRecord>,
    done: HashMap<StepKey, StepStatus>,
    last_attempt: HashMap<StepKey, u32>,
    open: HashMap<StepKey, StepRecord>,
    /// Scenes that failed for good, with the sub-step that dropped them
    scene_failures: HashMap<SceneId, SubStepId>,
}

impl RunState {
    pub fn replay(history: &[StepRecord]) -> Self {
        let mut state = Self::default();
        for record in history {
            state.apply(record);
        }
        state
    }

    /// Fold one record into the state.
    pub fn apply(&mut self, record: &StepRecord) {
        self.history.push(record.clone());
        let key = record.key();
        let attempt = self.last_attempt.entry(key.clone()).or_insert(0);
        *attempt = (*attempt).max(record.attempt);

        match record.status {
            StepStatus::Running => {
                self.open.insert(key.clone(), record.clone());
                if let Some(scene_id) = record.scene_id {
                    // A new attempt revives a scene that failed at this sub-step
                    if self.scene_failures.get(&scene_id) == Some(&record.sub_step) {
                        self.scene_failures.remove(&scene_id);
                        if let Some(scene) = self.scene_mut(scene_id) {
                            scene.result.status = SceneStatus::Pending;
                            scene.result.error = None;
                        }
                    }
                }
            }
            StepStatus::Completed | StepStatus::Skipped => {
                self.open.remove(&key);
                self.done.insert(key, record.status);
                if let Some(payload) = &record.payload {
                    self.apply_payload(record.scene_id, record.sub_step, payload);
                }
            }
            StepStatus::Failed => {
                self.open.remove(&key);
                if let Some(scene_id) = record.scene_id {
                    self.scene_failures.insert(scene_id, record.sub_step);
                    let error = record.error.clone();
                    if let Some(scene) = self.scene_mut(scene_id) {
                        scene.result.status = SceneStatus::Failed;
                        scene.result.error = error;
                    }
                }
            }
            StepStatus::Pending => {}
        }
    }

    fn apply_payload(&mut self, scene_id: Option<SceneId>, sub_step: SubStepId, payload: &StepPayload) {
        match payload {
            StepPayload::InputsProbed { inputs } => self.inputs = inputs.clone(),
            StepPayload::ScenesAnalyzed { scenes } => self.analyzed = scenes.clone(),
            StepPayload::ScenesGrouped { groups } => self.groups = groups.clone(),
            StepPayload::ScenePlan { scenes } => self.scenes = scenes.clone(),
            StepPayload::ScriptGenerated { lines } => self.script = lines.clone(),
            StepPayload::NarrationAssigned { assignments } => {
                for assignment in assignments {
                    if let Some(scene) = self.scene_mut(assignment.scene_id) {
                        scene.narration = assignment.narration.clone();
                    }
                }
            }
            StepPayload::Concatenated { output_path, .. }
            | StepPayload::MusicMixed { output_path }
            | StepPayload::SubtitlesBurned { output_path, .. } => {
                self.final_output = Some(output_path.clone());
            }
            _ => {
                if let Some(scene_id) = scene_id {
                    self.apply_scene_payload(scene_id, sub_step, payload);
                }
            }
        }
    }

    fn apply_scene_payload(&mut self, scene_id: SceneId, sub_step: SubStepId, payload: &StepPayload) {
        let Some(scene) = self.scene_mut(scene_id) else {
            return;
        };
        let result = &mut scene.result;
        match payload {
            StepPayload::SceneSplit { clip_path, duration } => {
                result.clip_path = Some(clip_path.clone());
                result.clip_duration = Some(*duration);
            }
            StepPayload::SceneReencoded { clip_path } => {
                result.clip_path = Some(clip_path.clone());
            }
            StepPayload::AudioSynthesized {
                audio_path,
                duration,
                ..
            } => {
                result.audio_path = Some(audio_path.clone());
                result.audio_duration = Some(*duration);
            }
            StepPayload::SpeedAdjusted {
                adjusted_path,
                speed_factor,
            } => {
                result.adjusted_path = Some(adjusted_path.clone());
                result.speed_factor = Some(*speed_factor);
            }
            StepPayload::SceneMerged { output_path } => {
                result.output_path = Some(output_path.clone());
            }
            _ => {}
        }
        // Merge is the last per-scene sub-step
        if sub_step == SubStepId::MergeAudioVideo {
            result.status = SceneStatus::Completed;
        }
    }

    /// Whether `key` has a completed or skipped record.
    pub fn is_done(&self, key: &StepKey) -> bool {
        self.done.contains_key(key)
    }

    /// `completed` or `skipped` once `key` is done.
    pub fn done_status(&self, key: &StepKey) -> Option<StepStatus> {
        self.done.get(key).copied()
    }

    /// Every record folded in so far, in order.
    pub fn history(&self) -> &[StepRecord] {
        &self.history
    }

    /// Highest attempt number recorded for `key` (0 if never attempted).
    pub fn last_attempt(&self, key: &StepKey) -> u32 {
        self.last_attempt.get(key).copied().unwrap_or(0)
    }

    /// Attempts that were opened but never closed, e.g. by a crash.
    pub fn open_attempts(&self) -> Vec<StepRecord> {
        let mut open: Vec<StepRecord> = self.open.values().cloned().collect();
        open.sort_by(|a, b| a.key().cmp(&b.key()));
        open
    }

    pub fn scene(&self, scene_id: SceneId) -> Option<&SceneTask> {
        self.scenes.iter().find(|s| s.id == scene_id)
    }

    fn scene_mut(&mut self, scene_id: SceneId) -> Option<&mut SceneTask> {
        self.scenes.iter_mut().find(|s| s.id == scene_id)
    }

    /// Scenes eligible for `sub_step`: everything not dropped by an earlier
    /// sub-step. Scenes that failed at `sub_step` itself get another run.
    pub fn scenes_for(&self, sub_step: SubStepId) -> Vec<SceneTask> {
        self.scenes
            .iter()
            .filter(|s| match self.scene_failures.get(&s.id) {
                Some(failed_at) => *failed_at == sub_step,
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Scenes still in the job, in playback order.
    pub fn surviving_scenes(&self) -> impl Iterator<Item = &SceneTask> {
        self.scenes
            .iter()
            .filter(|s| !self.scene_failures.contains_key(&s.id))
    }

    /// Scenes that reached a terminal state, and the total.
    pub fn scene_counts(&self) -> (u32, u32) {
        let processed = self
            .scenes
            .iter()
            .filter(|s| s.result.status != SceneStatus::Pending)
            .count();
        (processed as u32, self.scenes.len() as u32)
    }
}
