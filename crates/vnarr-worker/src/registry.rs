//! Step registry: the ordered stages and sub-steps of a job.
//!
//! Pure and deterministic. Progress and labels are recomputed from it on
//! every query, so nothing here touches storage.

use std::collections::HashSet;

use vnarr_models::{Job, SceneTask, StageId, StepRecord, SubStepId, TargetPlatform};

/// Facts about a job that decide which conditional sub-steps apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepContext {
    pub video_count: usize,
    /// At least one planned scene keeps its source audio
    pub any_original_audio: bool,
    pub platform: TargetPlatform,
}

impl StepContext {
    pub fn new(video_count: usize, any_original_audio: bool, platform: TargetPlatform) -> Self {
        Self {
            video_count,
            any_original_audio,
            platform,
        }
    }

    /// Context for `job` with its current scene plan (empty before analysis).
    pub fn for_job(job: &Job, scenes: &[SceneTask]) -> Self {
        Self::new(
            job.video_count(),
            scenes.iter().any(|s| s.keep_original_audio),
            job.spec.target_platform,
        )
    }
}

/// A major stage and its sub-steps, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub id: StageId,
    pub sub_steps: Vec<SubStepId>,
}

/// The stages of a job with the given context.
pub fn stages(ctx: &StepContext) -> Vec<Stage> {
    StageId::ALL
        .iter()
        .map(|&id| Stage {
            id,
            sub_steps: sub_steps(id, ctx),
        })
        .collect()
}

fn sub_steps(stage: StageId, ctx: &StepContext) -> Vec<SubStepId> {
    let mut steps = Vec::new();
    match stage {
        StageId::Analysis => {
            steps.push(SubStepId::ProbeInputs);
            steps.push(SubStepId::AnalyzeVideo);
            if ctx.video_count > 1 {
                steps.push(SubStepId::GroupScenes);
            }
            steps.push(SubStepId::PlanScenes);
        }
        StageId::Narration => {
            steps.push(SubStepId::GenerateScript);
            steps.push(SubStepId::AssignNarration);
        }
        StageId::SceneExtraction => {
            steps.push(SubStepId::SplitScenes);
            if ctx.any_original_audio {
                steps.push(SubStepId::ReencodeOriginalAudio);
            }
        }
        StageId::AudioVideoSync => {
            steps.push(SubStepId::SynthesizeAudio);
            steps.push(SubStepId::AdjustSpeed);
            steps.push(SubStepId::MergeAudioVideo);
        }
        StageId::Compose => {
            steps.push(SubStepId::Concatenate);
            steps.push(SubStepId::MixBackgroundMusic);
            if ctx.platform.burns_captions() {
                steps.push(SubStepId::BurnSubtitles);
            }
        }
    }
    steps
}

pub fn total_sub_steps(ctx: &StepContext) -> usize {
    stages(ctx).iter().map(|s| s.sub_steps.len()).sum()
}

/// Percentage of sub-steps with a job-level completed or skipped record.
pub fn progress(history: &[StepRecord], ctx: &StepContext) -> f64 {
    let total = total_sub_steps(ctx);
    if total == 0 {
        return 0.0;
    }

    let applicable: HashSet<(StageId, SubStepId)> = stages(ctx)
        .into_iter()
        .flat_map(|stage| stage.sub_steps.into_iter().map(move |sub| (stage.id, sub)))
        .collect();

    let done: HashSet<(StageId, SubStepId)> = history
        .iter()
        .filter(|r| r.scene_id.is_none() && r.status.is_done())
        .map(|r| (r.stage, r.sub_step))
        .filter(|key| applicable.contains(key))
        .collect();

    done.len() as f64 / total as f64 * 100.0
}

/// Status label for a position in the pipeline.
pub fn label(stage: StageId, sub_step: SubStepId) -> String {
    format!("{}: {}", stage.label(), sub_step.label())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vnarr_models::{JobId, StepKey, StepPayload};

    fn ctx(videos: usize, original_audio: bool, platform: TargetPlatform) -> StepContext {
        StepContext::new(videos, original_audio, platform)
    }

    fn done(job: &JobId, stage: StageId, sub: SubStepId) -> StepRecord {
        StepRecord::running(job, &StepKey::job_level(stage, sub), 1)
            .completed(StepPayload::not_applicable("test"))
    }

    #[test]
    fn test_stages_are_deterministic() {
        let c = ctx(2, true, TargetPlatform::Tiktok);
        assert_eq!(stages(&c), stages(&c));
        let ids: Vec<StageId> = stages(&c).iter().map(|s| s.id).collect();
        assert_eq!(ids, StageId::ALL.to_vec());
    }

    #[test]
    fn test_conditional_sub_steps() {
        let single = ctx(1, false, TargetPlatform::Generic);
        let multi = ctx(3, true, TargetPlatform::Douyin);

        let analysis = &stages(&single)[0];
        assert!(!analysis.sub_steps.contains(&SubStepId::GroupScenes));
        assert!(stages(&multi)[0].sub_steps.contains(&SubStepId::GroupScenes));

        assert!(!stages(&single)[2]
            .sub_steps
            .contains(&SubStepId::ReencodeOriginalAudio));
        assert!(stages(&multi)[2]
            .sub_steps
            .contains(&SubStepId::ReencodeOriginalAudio));

        assert_eq!(total_sub_steps(&single), 11);
        assert_eq!(total_sub_steps(&multi), 14);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let c = ctx(1, false, TargetPlatform::Generic);
        let job = JobId::from_string("job");
        let mut history = Vec::new();
        let mut last = progress(&history, &c);
        assert_eq!(last, 0.0);

        for stage in stages(&c) {
            for sub in stage.sub_steps {
                history.push(StepRecord::running(&job, &StepKey::job_level(stage.id, sub), 1));
                history.push(done(&job, stage.id, sub));
                let now = progress(&history, &c);
                assert!(now > last, "{now} should exceed {last}");
                last = now;
            }
        }
        assert!((last - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_progress_ignores_scene_and_repeated_records() {
        let c = ctx(1, false, TargetPlatform::Generic);
        let job = JobId::from_string("job");
        let scene = StepRecord::running(
            &job,
            &StepKey::scene(StageId::AudioVideoSync, SubStepId::MergeAudioVideo, 1),
            1,
        )
        .completed(StepPayload::not_applicable("test"));
        let probe = done(&job, StageId::Analysis, SubStepId::ProbeInputs);

        let history = vec![scene, probe.clone(), probe];
        let expected = 100.0 / total_sub_steps(&c) as f64;
        assert!((progress(&history, &c) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_label() {
        assert_eq!(
            label(StageId::Compose, SubStepId::Concatenate),
            "Composing final cut: Concatenating scenes"
        );
    }
}
