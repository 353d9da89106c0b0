//! Compatibility shim for jobs whose step history is missing.
//!
//! Older deployments only kept the checkpoint. When a job has no history at
//! all, the executor asks this module for records to seed it with; with
//! history present it is never consulted.

use std::path::Path;

use vnarr_models::{JobCheckpoint, JobId, StepKey, StepPayload, StepRecord, SubStepId};

use crate::registry::{stages, StepContext};

const INFERRED: &str = "inferred from legacy checkpoint";

/// Synthesize completed records implied by a legacy checkpoint.
///
/// Only a recorded final output is trusted: compose is the last stage, so
/// it implies every sub-step finished. Anything short of that restarts the
/// job from the beginning.
pub fn infer_completed_from_checkpoint(
    job_id: &JobId,
    checkpoint: &JobCheckpoint,
    ctx: &StepContext,
) -> Vec<StepRecord> {
    let Some(final_output) = checkpoint.final_output.as_ref() else {
        return Vec::new();
    };

    let keys: Vec<StepKey> = stages(ctx)
        .into_iter()
        .flat_map(|stage| {
            stage
                .sub_steps
                .into_iter()
                .map(move |sub| StepKey::job_level(stage.id, sub))
        })
        .collect();

    let last = keys.len().saturating_sub(1);
    keys.iter()
        .enumerate()
        .map(|(i, key)| {
            let payload = if i == last {
                final_payload(key.sub_step, final_output)
            } else {
                StepPayload::not_applicable(INFERRED)
            };
            StepRecord::running(job_id, key, 1).completed(payload)
        })
        .collect()
}

/// Payload of the last sub-step, which replays into the job's final output.
fn final_payload(sub_step: SubStepId, output: &Path) -> StepPayload {
    match sub_step {
        SubStepId::BurnSubtitles => StepPayload::SubtitlesBurned {
            output_path: output.to_path_buf(),
            subtitle_path: output.with_extension("srt"),
        },
        SubStepId::MixBackgroundMusic => StepPayload::MusicMixed {
            output_path: output.to_path_buf(),
        },
        _ => StepPayload::Concatenated {
            output_path: output.to_path_buf(),
            scene_count: 0,
        },
    }
}
