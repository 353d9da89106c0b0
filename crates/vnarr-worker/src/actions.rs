//! Sub-step actions.
//!
//! Each action reads the run state rebuilt from history and returns the
//! payload its record carries. Actions never write history themselves.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, warn};

use vnarr_ai::AnalysisVideo;
use vnarr_media::{build_srt, speed_plan, MergeRequest, SplitRequest, SubtitleCue};
use vnarr_models::{NarrationAssignment, SceneId, SceneTask, StepPayload, SubStepId};

use crate::error::{WorkerError, WorkerResult};
use crate::state::RunState;
use crate::workflow::{JobRun, StepOutcome, WorkflowExecutor};

impl WorkflowExecutor {
    /// Run one job-level sub-step.
    pub(crate) async fn execute(
        &self,
        run: &JobRun<'_>,
        sub_step: SubStepId,
        state: &RunState,
    ) -> WorkerResult<StepOutcome> {
        match sub_step {
            SubStepId::ProbeInputs => self.probe_inputs(run).await,
            SubStepId::AnalyzeVideo => self.analyze(run, state).await,
            SubStepId::GroupScenes => Ok(group_scenes(run.job.video_count(), &state.analyzed)),
            SubStepId::PlanScenes => Ok(plan_scenes(&state.analyzed, &state.groups)),
            SubStepId::GenerateScript => self.generate_script(run, state).await,
            SubStepId::AssignNarration => assign_narration(state),
            SubStepId::Concatenate => self.concatenate(run, state).await,
            SubStepId::MixBackgroundMusic => self.mix_background_music(run, state).await,
            SubStepId::BurnSubtitles => self.burn_subtitles(run, state).await,
            other => Err(WorkerError::state(format!(
                "{} runs per scene, not at job level",
                other
            ))),
        }
    }

    /// Run one per-scene sub-step for `scene`.
    pub(crate) async fn execute_scene(
        &self,
        run: &JobRun<'_>,
        sub_step: SubStepId,
        scene: &SceneTask,
    ) -> WorkerResult<StepOutcome> {
        if run.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }
        match sub_step {
            SubStepId::SplitScenes => self.split_scene(run, scene).await,
            SubStepId::ReencodeOriginalAudio => self.reencode_scene(run, scene).await,
            SubStepId::SynthesizeAudio => self.synthesize_scene(run, scene).await,
            SubStepId::AdjustSpeed => self.adjust_scene_speed(run, scene).await,
            SubStepId::MergeAudioVideo => self.merge_scene(run, scene).await,
            other => Err(WorkerError::state(format!("{} is not a per-scene sub-step", other))),
        }
    }

    async fn probe_inputs(&self, run: &JobRun<'_>) -> WorkerResult<StepOutcome> {
        let mut inputs = Vec::with_capacity(run.job.video_count());
        for (index, video) in run.job.videos.iter().enumerate() {
            let info = self
                .deps
                .media
                .probe(&video.path, self.media_options(run))
                .await?;
            if !info.has_video() {
                return Err(WorkerError::invalid_input(format!(
                    "{} has no video stream",
                    video.path.display()
                )));
            }
            debug!(
                "Input {}: {:.1}s {}x{} @ {:.2}fps",
                index, info.duration, info.width, info.height, info.fps
            );
            inputs.push(info.to_probed_input(index));
        }
        Ok(StepOutcome::Completed(StepPayload::InputsProbed { inputs }))
    }

    async fn analyze(&self, run: &JobRun<'_>, state: &RunState) -> WorkerResult<StepOutcome> {
        let videos: Vec<AnalysisVideo> = run
            .job
            .videos
            .iter()
            .enumerate()
            .map(|(index, video)| AnalysisVideo {
                index,
                path: video.path.clone(),
                duration: input_duration(state, index).unwrap_or(0.0),
                title: video.title.clone(),
            })
            .collect();

        let proposed = self.deps.analyzer.analyze(&videos, &run.job.spec).await?;

        let mut scenes = Vec::with_capacity(proposed.len());
        for candidate in &proposed {
            if candidate.source_index >= run.job.video_count() {
                warn!(
                    source_index = candidate.source_index,
                    "Dropping scene for unknown source video"
                );
                continue;
            }
            let id = scenes.len() as SceneId + 1;
            match candidate.to_scene_task(id, input_duration(state, candidate.source_index)) {
                Ok(scene) => scenes.push(scene),
                Err(e) => warn!(
                    "Dropping scene {}-{} from video {}: {}",
                    candidate.start, candidate.end, candidate.source_index, e
                ),
            }
        }

        if scenes.is_empty() {
            return Err(WorkerError::invalid_input(format!(
                "analysis proposed {} scene(s), none with usable bounds",
                proposed.len()
            )));
        }
        Ok(StepOutcome::Completed(StepPayload::ScenesAnalyzed { scenes }))
    }

    async fn generate_script(
        &self,
        run: &JobRun<'_>,
        state: &RunState,
    ) -> WorkerResult<StepOutcome> {
        let targets = narration_targets(&state.scenes);
        if targets.is_empty() {
            return Ok(StepOutcome::skipped("every scene keeps its original audio"));
        }

        let lines = self
            .deps
            .writer
            .write_script(&targets, run.job.spec.script_outline.as_deref())
            .await?;
        if lines.len() != targets.len() {
            return Err(WorkerError::state(format!(
                "script has {} lines for {} narrated scenes",
                lines.len(),
                targets.len()
            )));
        }
        Ok(StepOutcome::Completed(StepPayload::ScriptGenerated { lines }))
    }

    async fn concatenate(&self, run: &JobRun<'_>, state: &RunState) -> WorkerResult<StepOutcome> {
        let mut clips = Vec::new();
        for scene in state.surviving_scenes() {
            let clip = scene.latest_artifact().ok_or_else(|| WorkerError::Scene {
                scene_id: scene.id,
                message: "no rendered clip to concatenate".to_string(),
            })?;
            clips.push(clip.to_path_buf());
        }
        if clips.is_empty() {
            return Err(WorkerError::state("no scene survived to concatenate"));
        }

        let output = run.dir.join("narrated.mp4");
        let output_path = self
            .deps
            .media
            .concatenate(&clips, &output, self.media_options(run))
            .await?;
        Ok(StepOutcome::Completed(StepPayload::Concatenated {
            output_path,
            scene_count: clips.len(),
        }))
    }

    async fn mix_background_music(
        &self,
        run: &JobRun<'_>,
        state: &RunState,
    ) -> WorkerResult<StepOutcome> {
        let Some(music) = run.job.spec.background_music.as_ref() else {
            return Ok(StepOutcome::skipped("no background music selected"));
        };
        let video = current_output(state)?;

        let video_secs = self.deps.media.probe(&video, self.media_options(run)).await?.duration;
        let music_secs = self.deps.media.probe(music, self.media_options(run)).await?.duration;

        let mut track = music.clone();
        if music_secs > 0.0 && music_secs < video_secs {
            debug!("Looping {:.1}s music bed to {:.1}s", music_secs, video_secs);
            let extension = music.extension().and_then(|e| e.to_str()).unwrap_or("m4a");
            let looped = run.dir.join(format!("music_looped.{}", extension));
            track = self
                .deps
                .media
                .loop_to_duration(music, video_secs, &looped, self.media_options(run))
                .await?;
        }

        let output = run.dir.join("with_music.mp4");
        let output_path = self
            .deps
            .media
            .mix_background(
                &video,
                &track,
                f64::from(run.job.spec.background_music_volume),
                &output,
                self.media_options(run),
            )
            .await?;
        Ok(StepOutcome::Completed(StepPayload::MusicMixed { output_path }))
    }

    async fn burn_subtitles(&self, run: &JobRun<'_>, state: &RunState) -> WorkerResult<StepOutcome> {
        let srt = build_srt(&caption_cues(state.surviving_scenes()));
        if srt.is_empty() {
            return Ok(StepOutcome::skipped("no narration to caption"));
        }
        let video = current_output(state)?;

        let subtitle_path = run.dir.join("captions.srt");
        tokio::fs::write(&subtitle_path, srt).await?;

        let output = run.dir.join("captioned.mp4");
        let output_path = self
            .deps
            .media
            .burn_subtitles(
                &video,
                &subtitle_path,
                &output,
                &run.job.spec.output,
                self.media_options(run),
            )
            .await?;
        Ok(StepOutcome::Completed(StepPayload::SubtitlesBurned {
            output_path,
            subtitle_path,
        }))
    }

    async fn split_scene(&self, run: &JobRun<'_>, scene: &SceneTask) -> WorkerResult<StepOutcome> {
        let source = run
            .job
            .videos
            .get(scene.source_index)
            .ok_or_else(|| {
                WorkerError::invalid_input(format!(
                    "scene {} references missing video {}",
                    scene.id, scene.source_index
                ))
            })?;

        let request = SplitRequest {
            source: source.path.clone(),
            start_secs: scene.start_secs,
            duration: scene.duration(),
            output: run.dir.join(format!("scene_{:03}.mp4", scene.id)),
            format: run.job.spec.output,
        };
        let clip_path = self.deps.media.split(&request, self.media_options(run)).await?;
        let duration = self
            .deps
            .media
            .probe(&clip_path, self.media_options(run))
            .await?
            .duration;

        Ok(StepOutcome::Completed(StepPayload::SceneSplit {
            clip_path,
            duration,
        }))
    }

    async fn reencode_scene(&self, run: &JobRun<'_>, scene: &SceneTask) -> WorkerResult<StepOutcome> {
        if !scene.keep_original_audio {
            return Ok(StepOutcome::skipped("scene is narrated"));
        }
        let clip = require_clip(scene)?;
        let output = run.dir.join(format!("scene_{:03}_original.mp4", scene.id));
        let clip_path = self
            .deps
            .media
            .reencode_original_audio(&clip, &output, self.media_options(run))
            .await?;
        Ok(StepOutcome::Completed(StepPayload::SceneReencoded { clip_path }))
    }

    /// Synthesize every candidate take and keep the one whose length is
    /// closest to the clip.
    async fn synthesize_scene(
        &self,
        run: &JobRun<'_>,
        scene: &SceneTask,
    ) -> WorkerResult<StepOutcome> {
        if !scene.needs_narration() {
            return Ok(StepOutcome::skipped("scene has no narration"));
        }
        let voice = &run.job.spec.voice;
        let takes = voice.candidates.max(1);
        let target = scene.result.clip_duration.unwrap_or_else(|| scene.duration());

        let audio_dir = run.dir.join("audio");
        tokio::fs::create_dir_all(&audio_dir).await?;

        let mut best: Option<(PathBuf, f64)> = None;
        for take in 1..=takes {
            if run.is_cancelled() {
                return Err(WorkerError::Cancelled);
            }
            let out = audio_dir.join(format!("scene_{:03}_take{}.mp3", scene.id, take));
            let audio = self
                .deps
                .synthesizer
                .synthesize(&scene.narration, voice, &out)
                .await?;
            let duration = match audio.duration {
                Some(duration) => duration,
                None => {
                    self.deps
                        .media
                        .probe(&audio.path, self.media_options(run))
                        .await?
                        .duration
                }
            };
            debug!(scene_id = scene.id, take, "Take is {:.2}s for a {:.2}s clip", duration, target);

            let closer = match &best {
                Some((_, current)) => (duration - target).abs() < (current - target).abs(),
                None => true,
            };
            if closer {
                best = Some((audio.path, duration));
            }
        }

        let (audio_path, duration) = best.ok_or_else(|| WorkerError::Scene {
            scene_id: scene.id,
            message: "no narration take was produced".to_string(),
        })?;
        Ok(StepOutcome::Completed(StepPayload::AudioSynthesized {
            audio_path,
            duration,
            candidates: takes,
        }))
    }

    async fn adjust_scene_speed(
        &self,
        run: &JobRun<'_>,
        scene: &SceneTask,
    ) -> WorkerResult<StepOutcome> {
        let Some(audio_secs) = scene.result.audio_duration.filter(|_| scene.needs_narration()) else {
            return Ok(StepOutcome::skipped("scene has no narration audio"));
        };
        let clip = require_clip(scene)?;
        let clip_secs = scene.result.clip_duration.unwrap_or_else(|| scene.duration());

        let plan = speed_plan(clip_secs, audio_secs);
        if !plan.needs_adjustment() {
            return Ok(StepOutcome::skipped("clip already spans its narration"));
        }

        let output = run.dir.join(format!("scene_{:03}_speed.mp4", scene.id));
        let adjusted_path = self
            .deps
            .media
            .adjust_speed(
                &clip,
                plan.factor,
                &output,
                &run.job.spec.output,
                self.media_options(run),
            )
            .await?;
        Ok(StepOutcome::Completed(StepPayload::SpeedAdjusted {
            adjusted_path,
            speed_factor: plan.factor,
        }))
    }

    async fn merge_scene(&self, run: &JobRun<'_>, scene: &SceneTask) -> WorkerResult<StepOutcome> {
        let (Some(audio), Some(audio_duration)) =
            (scene.result.audio_path.clone(), scene.result.audio_duration)
        else {
            return Ok(StepOutcome::skipped("scene keeps its original audio"));
        };
        if !scene.needs_narration() {
            return Ok(StepOutcome::skipped("scene keeps its original audio"));
        }

        let clip_secs = scene.result.clip_duration.unwrap_or_else(|| scene.duration());
        let factor = scene.result.speed_factor.unwrap_or(1.0);
        let video = match &scene.result.adjusted_path {
            Some(adjusted) => adjusted.clone(),
            None => require_clip(scene)?,
        };

        let request = MergeRequest {
            video,
            audio,
            audio_duration,
            pad_secs: (audio_duration - clip_secs / factor).max(0.0),
            output: run.dir.join(format!("scene_{:03}_final.mp4", scene.id)),
            format: run.job.spec.output,
        };
        let output_path = self.deps.media.merge(&request, self.media_options(run)).await?;
        Ok(StepOutcome::Completed(StepPayload::SceneMerged { output_path }))
    }
}

fn input_duration(state: &RunState, index: usize) -> Option<f64> {
    state
        .inputs
        .iter()
        .find(|input| input.index == index)
        .map(|input| input.duration)
}

fn current_output(state: &RunState) -> WorkerResult<PathBuf> {
    state
        .final_output
        .clone()
        .ok_or_else(|| WorkerError::state("no composed video yet"))
}

fn require_clip(scene: &SceneTask) -> WorkerResult<PathBuf> {
    scene.result.clip_path.clone().ok_or_else(|| WorkerError::Scene {
        scene_id: scene.id,
        message: "scene has not been cut yet".to_string(),
    })
}

/// Scenes that get a narration line, in plan order.
fn narration_targets(scenes: &[SceneTask]) -> Vec<SceneTask> {
    scenes
        .iter()
        .filter(|s| !s.keep_original_audio)
        .cloned()
        .collect()
}

/// Scene ids per source video, each group ordered by start time.
pub(crate) fn group_scenes(video_count: usize, analyzed: &[SceneTask]) -> StepOutcome {
    let mut by_source: BTreeMap<usize, Vec<&SceneTask>> = BTreeMap::new();
    for scene in analyzed {
        by_source.entry(scene.source_index).or_default().push(scene);
    }

    let groups = (0..video_count)
        .map(|index| {
            let mut members = by_source.remove(&index).unwrap_or_default();
            members.sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));
            members.into_iter().map(|s| s.id).collect()
        })
        .collect();
    StepOutcome::Completed(StepPayload::ScenesGrouped { groups })
}

/// The playback order: group by group when grouped, otherwise by source
/// video then start time.
pub(crate) fn plan_scenes(analyzed: &[SceneTask], groups: &[Vec<SceneId>]) -> StepOutcome {
    let scenes = if groups.is_empty() {
        let mut scenes = analyzed.to_vec();
        scenes.sort_by(|a, b| {
            a.source_index
                .cmp(&b.source_index)
                .then(a.start_secs.total_cmp(&b.start_secs))
        });
        scenes
    } else {
        groups
            .iter()
            .flatten()
            .filter_map(|id| analyzed.iter().find(|s| s.id == *id).cloned())
            .collect()
    };
    StepOutcome::Completed(StepPayload::ScenePlan { scenes })
}

pub(crate) fn assign_narration(state: &RunState) -> WorkerResult<StepOutcome> {
    let targets = narration_targets(&state.scenes);
    if targets.is_empty() {
        return Ok(StepOutcome::skipped("every scene keeps its original audio"));
    }
    if state.script.len() != targets.len() {
        return Err(WorkerError::state(format!(
            "script has {} lines for {} narrated scenes",
            state.script.len(),
            targets.len()
        )));
    }

    let assignments = targets
        .iter()
        .zip(&state.script)
        .map(|(scene, line)| NarrationAssignment {
            scene_id: scene.id,
            narration: line.trim().to_string(),
        })
        .collect();
    Ok(StepOutcome::Completed(StepPayload::NarrationAssigned { assignments }))
}

/// Caption cues on the composed timeline. A narrated scene lasts as long as
/// its narration; an original-audio scene lasts as long as its clip.
pub(crate) fn caption_cues<'a>(scenes: impl Iterator<Item = &'a SceneTask>) -> Vec<SubtitleCue> {
    let mut cues = Vec::new();
    let mut cursor = 0.0;
    for scene in scenes {
        let clip_secs = scene.result.clip_duration.unwrap_or_else(|| scene.duration());
        let length = match scene.result.audio_duration {
            Some(audio) if scene.needs_narration() => audio,
            _ => clip_secs,
        };
        if scene.needs_narration() {
            cues.push(SubtitleCue::new(cursor, cursor + length, scene.narration.clone()));
        }
        cursor += length;
    }
    cues
}

#[cfg(test)]
mod tests {
    use super::*;
    use vnarr_models::{JobId, StageId, StepKey, StepRecord};

    fn scene(id: SceneId, source: usize, start: f64, end: f64) -> SceneTask {
        SceneTask::new(id, source, start, end)
    }

    fn payload(outcome: StepOutcome) -> StepPayload {
        match outcome {
            StepOutcome::Completed(p) => p,
            StepOutcome::Skipped(p) => panic!("unexpected skip: {:?}", p),
        }
    }

    #[test]
    fn test_group_and_plan_orders_by_source_then_start() {
        let analyzed = vec![
            scene(1, 1, 10.0, 14.0),
            scene(2, 0, 30.0, 33.0),
            scene(3, 1, 2.0, 6.0),
            scene(4, 0, 5.0, 9.0),
        ];

        let groups = match payload(group_scenes(3, &analyzed)) {
            StepPayload::ScenesGrouped { groups } => groups,
            other => panic!("unexpected payload {:?}", other),
        };
        assert_eq!(groups, vec![vec![4, 2], vec![3, 1], vec![]]);

        let planned = |groups: &[Vec<SceneId>]| match payload(plan_scenes(&analyzed, groups)) {
            StepPayload::ScenePlan { scenes } => scenes.iter().map(|s| s.id).collect::<Vec<_>>(),
            other => panic!("unexpected payload {:?}", other),
        };
        assert_eq!(planned(&groups), vec![4, 2, 3, 1]);
        assert_eq!(planned(&[]), vec![4, 2, 3, 1]);
    }

    #[test]
    fn test_assign_narration_skips_original_audio_scenes() {
        let mut kept = scene(2, 0, 4.0, 8.0);
        kept.keep_original_audio = true;
        let plan = StepRecord::running(
            &JobId::from_string("j"),
            &StepKey::job_level(StageId::Analysis, SubStepId::PlanScenes),
            1,
        )
        .completed(StepPayload::ScenePlan {
            scenes: vec![scene(1, 0, 0.0, 4.0), kept, scene(3, 0, 8.0, 12.0)],
        });
        let mut state = RunState::replay(&[plan]);
        state.script = vec![" First. ".into(), "Third.".into()];

        match payload(assign_narration(&state).unwrap()) {
            StepPayload::NarrationAssigned { assignments } => {
                let ids: Vec<_> = assignments.iter().map(|a| a.scene_id).collect();
                assert_eq!(ids, vec![1, 3]);
                assert_eq!(assignments[0].narration, "First.");
            }
            other => panic!("unexpected payload {:?}", other),
        }

        state.script.pop();
        assert!(assign_narration(&state).is_err());
    }

    #[test]
    fn test_caption_cues_follow_composed_timeline() {
        let mut narrated = scene(1, 0, 0.0, 4.0);
        narrated.narration = "It begins.".into();
        narrated.result.clip_duration = Some(4.0);
        narrated.result.audio_duration = Some(5.5);

        let mut original = scene(2, 0, 4.0, 7.0);
        original.keep_original_audio = true;
        original.result.clip_duration = Some(3.0);

        let mut last = scene(3, 0, 7.0, 9.0);
        last.narration = "It ends.".into();
        last.result.clip_duration = Some(2.0);
        last.result.audio_duration = Some(2.0);

        let scenes = [narrated, original, last];
        let cues = caption_cues(scenes.iter());
        assert_eq!(cues.len(), 2);
        assert_eq!((cues[0].start, cues[0].end), (0.0, 5.5));
        assert_eq!((cues[1].start, cues[1].end), (8.5, 10.5));
        assert_eq!(cues[1].text, "It ends.");
    }
}
