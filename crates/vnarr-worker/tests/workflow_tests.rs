//! End-to-end runs of the workflow executor against fake collaborators.

mod common;

use std::time::Duration;

use tokio::sync::watch;

use vnarr_models::{
    CheckpointPatch, ErrorCategory, JobStatus, ProbedInput, SceneFailurePolicy, StageId,
    StepKey, StepPayload, StepRecord, StepStatus, SubStepId, TargetPlatform,
};
use vnarr_queue::{JobAdmissionQueue, QueueConfig};
use vnarr_store::{JobStateStore, JobStore, StepHistoryStore};
use vnarr_worker::{JobExecutor, RunState, STOPPED_BY_USER};

use common::{four_scenes, scene, two_video_job, FakeAi, Harness};

fn merge_records(history: &[StepRecord]) -> Vec<&StepRecord> {
    history
        .iter()
        .filter(|r| r.sub_step == SubStepId::MergeAudioVideo && r.scene_id.is_some())
        .collect()
}

fn assert_no_open_attempts(history: &[StepRecord]) {
    let open = RunState::replay(history).open_attempts();
    assert!(open.is_empty(), "open attempts left behind: {:?}", open);
}

#[tokio::test]
async fn test_merge_timeout_fails_job_and_releases_slot() {
    let h = Harness::new(four_scenes());
    h.media.fail_merge(3);

    let queue = JobAdmissionQueue::new(QueueConfig {
        max_concurrent_jobs: 1,
    });
    let executor = JobExecutor::new(queue.clone(), h.workflow());
    let (_tx, rx) = watch::channel(false);

    let job = executor
        .submit(two_video_job(SceneFailurePolicy::FailJob), rx)
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_category, Some(ErrorCategory::Retryable));
    assert!(job.error_message.as_deref().unwrap().contains("timed out"));
    assert!(job.error_guidance.is_some());
    assert_eq!(queue.status().running, 0);

    let stored = h.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);

    let history = h.store.query_by_job(&job.id).await.unwrap();
    let merges = merge_records(&history);

    let mut completed: Vec<_> = merges
        .iter()
        .filter(|r| r.status == StepStatus::Completed)
        .filter_map(|r| r.scene_id)
        .collect();
    completed.sort_unstable();
    assert_eq!(completed, vec![1, 2, 4]);

    let failed: Vec<_> = merges
        .iter()
        .filter(|r| r.status == StepStatus::Failed)
        .collect();
    assert!(!failed.is_empty());
    for record in &failed {
        assert_eq!(record.scene_id, Some(3));
        assert!(record.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(record.error_category, Some(ErrorCategory::Retryable));
        assert!(matches!(
            record.payload,
            Some(StepPayload::Diagnostics { .. })
        ));
    }

    // Nothing after the failed fan-out ran
    assert!(h.media.calls_to("concat").is_empty());
    assert_no_open_attempts(&history);
}

#[tokio::test]
async fn test_happy_path_records_every_sub_step() {
    let h = Harness::new(four_scenes());
    let (_tx, rx) = watch::channel(false);

    let job = h
        .workflow()
        .run(two_video_job(SceneFailurePolicy::FailJob), rx)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
    assert!(job.error_message.is_none());

    let checkpoint = h.store.get(&job.id).await.unwrap().unwrap();
    assert!(checkpoint.final_output.unwrap().ends_with("narrated.mp4"));
    assert_eq!(checkpoint.processed_scenes, 4);
    assert_eq!(checkpoint.total_scenes, 4);

    assert_eq!(h.media.calls_to("split").len(), 4);
    assert_eq!(h.media.calls_to("speed").len(), 4);
    assert_eq!(h.media.calls_to("merge").len(), 4);
    assert_eq!(h.media.calls_to("concat"), vec!["concat 4".to_string()]);
    // Generic platform, no music
    assert!(h.media.calls_to("mix").is_empty());
    assert!(h.media.calls_to("burn").is_empty());

    let history = h.store.query_by_job(&job.id).await.unwrap();
    let state = RunState::replay(&history);
    let group = StepKey::job_level(StageId::Analysis, SubStepId::GroupScenes);
    assert_eq!(state.done_status(&group), Some(StepStatus::Completed));
    let music = StepKey::job_level(StageId::Compose, SubStepId::MixBackgroundMusic);
    assert_eq!(state.done_status(&music), Some(StepStatus::Skipped));
    assert_eq!(
        state.scenes.iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert!(state
        .scenes
        .iter()
        .all(|s| s.narration == format!("Narration for scene {}.", s.id)));
    assert_no_open_attempts(&history);
}

#[tokio::test]
async fn test_resume_skips_completed_work() {
    let h = Harness::new(four_scenes());
    h.media.fail_merge(3);
    let workflow = h.workflow();
    let (_tx, rx) = watch::channel(false);

    let first = workflow
        .run(two_video_job(SceneFailurePolicy::FailJob), rx.clone())
        .await
        .unwrap();
    assert_eq!(first.status, JobStatus::Failed);
    // Two attempts, both timed out
    let scene_three_merges = |calls: Vec<String>| {
        calls
            .iter()
            .filter(|c| c.contains("scene_003_final"))
            .count()
    };
    assert_eq!(scene_three_merges(h.media.calls_to("merge")), 2);

    h.media.heal_merges();
    let stored = h.store.get_job(&first.id).await.unwrap().unwrap();
    let second = workflow.run(stored, rx).await.unwrap();
    assert_eq!(second.status, JobStatus::Completed, "{:?}", second.error_message);
    assert_eq!(second.started_at, first.started_at);

    assert_eq!(h.ai.analyze_calls(), 1);
    assert_eq!(h.ai.script_calls(), 1);
    assert_eq!(h.media.calls_to("split").len(), 4);
    // Scenes 1, 2 and 4 merged once; scene 3 twice before and once after
    assert_eq!(h.media.calls_to("merge").len(), 3 + 2 + 1);
    assert_eq!(scene_three_merges(h.media.calls_to("merge")), 3);
    assert_eq!(h.media.calls_to("concat"), vec!["concat 4".to_string()]);

    let history = h.store.query_by_job(&first.id).await.unwrap();
    let merge_key = StepKey::job_level(StageId::AudioVideoSync, SubStepId::MergeAudioVideo);
    let state = RunState::replay(&history);
    assert_eq!(state.last_attempt(&merge_key), 2);
    assert_no_open_attempts(&history);
}

#[tokio::test]
async fn test_resume_closes_interrupted_attempt() {
    let h = Harness::new(four_scenes());
    let job = two_video_job(SceneFailurePolicy::FailJob);
    h.store.save_job(&job).await.unwrap();

    // A previous worker probed the inputs and died while analyzing
    let probe_key = StepKey::job_level(StageId::Analysis, SubStepId::ProbeInputs);
    let probed = StepRecord::running(&job.id, &probe_key, 1);
    let inputs = (0..2)
        .map(|index| ProbedInput {
            index,
            duration: 60.0,
            width: 1920,
            height: 1080,
            fps: 30.0,
            has_audio: true,
        })
        .collect();
    h.store.append(probed.clone()).await.unwrap();
    h.store
        .append(probed.completed(StepPayload::InputsProbed { inputs }))
        .await
        .unwrap();
    let analyze_key = StepKey::job_level(StageId::Analysis, SubStepId::AnalyzeVideo);
    h.store
        .append(StepRecord::running(&job.id, &analyze_key, 1))
        .await
        .unwrap();

    let (_tx, rx) = watch::channel(false);
    let job = h.workflow().run(job, rx).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);

    let probed_inputs = h
        .media
        .calls_to("probe")
        .into_iter()
        .filter(|c| c.ends_with("a.mp4") || c.ends_with("b.mp4"))
        .count();
    assert_eq!(probed_inputs, 0);

    let history = h.store.query_by_job(&job.id).await.unwrap();
    let analyze: Vec<_> = history
        .iter()
        .filter(|r| r.key() == analyze_key)
        .map(|r| (r.attempt, r.status))
        .collect();
    assert_eq!(
        analyze,
        vec![
            (1, StepStatus::Running),
            (1, StepStatus::Failed),
            (2, StepStatus::Running),
            (2, StepStatus::Completed),
        ]
    );
    assert_no_open_attempts(&history);
}

#[tokio::test]
async fn test_best_effort_composes_surviving_scenes() {
    let h = Harness::new(four_scenes());
    h.media.fail_merge(3);
    let (_tx, rx) = watch::channel(false);

    let job = h
        .workflow()
        .run(two_video_job(SceneFailurePolicy::BestEffort), rx)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
    assert_eq!(h.media.calls_to("concat"), vec!["concat 3".to_string()]);

    let history = h.store.query_by_job(&job.id).await.unwrap();
    let closed = history
        .iter()
        .rev()
        .find(|r| {
            r.sub_step == SubStepId::MergeAudioVideo
                && r.scene_id.is_none()
                && r.status.is_terminal()
        })
        .unwrap();
    assert_eq!(closed.status, StepStatus::Completed);
    assert_eq!(
        closed.payload,
        Some(StepPayload::ScenesProcessed {
            processed: vec![1, 2, 4],
            failed: vec![3],
        })
    );
}

#[tokio::test]
async fn test_best_effort_fails_when_no_scene_survives() {
    let h = Harness::new(vec![scene(0, "00:00", "00:04")]);
    h.media.fail_merge(1);
    let (_tx, rx) = watch::channel(false);

    let mut job = two_video_job(SceneFailurePolicy::BestEffort);
    job.videos.truncate(1);
    let job = h.workflow().run(job, rx).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("1 of 1 scenes failed at merge_audio_video"));
}

#[tokio::test]
async fn test_optional_compose_steps_run_when_applicable() {
    let mut original = scene(0, "00:30", "00:34");
    original.keep_original_audio = true;
    let h = Harness::new(vec![
        scene(0, "00:00", "00:04"),
        original,
        scene(0, "00:40", "00:44"),
    ]);
    h.media.set_duration("/in/music.mp3", 5.0);

    let mut job = two_video_job(SceneFailurePolicy::FailJob);
    job.videos.truncate(1);
    job.spec.target_platform = TargetPlatform::Tiktok;
    job.spec.background_music = Some("/in/music.mp3".into());

    let (_tx, rx) = watch::channel(false);
    let job = h.workflow().run(job, rx).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);

    assert_eq!(h.media.calls_to("reencode").len(), 1);
    assert_eq!(h.media.calls_to("merge").len(), 2);
    assert_eq!(h.media.calls_to("loop").len(), 1);
    assert_eq!(h.media.calls_to("mix").len(), 1);
    assert_eq!(h.media.calls_to("burn").len(), 1);

    let checkpoint = h.store.get(&job.id).await.unwrap().unwrap();
    assert!(checkpoint.final_output.unwrap().ends_with("captioned.mp4"));

    let history = h.store.query_by_job(&job.id).await.unwrap();
    let state = RunState::replay(&history);
    let kept = state.scene(2).unwrap();
    assert!(kept.narration.is_empty());
    assert!(kept.result.output_path.is_none());
    assert!(kept.latest_artifact().unwrap().ends_with("scene_002_original.mp4"));
}

#[tokio::test]
async fn test_cancellation_stops_job() {
    let h = Harness::new(four_scenes());
    let (tx, rx) = watch::channel(false);
    h.media.cancel_on_split(tx);

    let job = h
        .workflow()
        .run(two_video_job(SceneFailurePolicy::FailJob), rx)
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(STOPPED_BY_USER));
    assert_eq!(job.error_category, None);
    assert!(h.media.calls_to("split").len() <= 2);
    assert!(h.media.calls_to("merge").is_empty());

    let checkpoint = h.store.get(&job.id).await.unwrap().unwrap();
    assert!(checkpoint.stopped_by_user);

    let history = h.store.query_by_job(&job.id).await.unwrap();
    assert!(history
        .iter()
        .filter(|r| r.status == StepStatus::Failed)
        .all(|r| r.error.as_deref() == Some(STOPPED_BY_USER) && r.error_category.is_none()));
    assert_no_open_attempts(&history);
}

#[tokio::test]
async fn test_watchdog_fails_stuck_step() {
    let mut h = Harness::new(four_scenes());
    h.settings.max_step_duration = Duration::from_millis(50);
    h.media.delay_probes(Duration::from_millis(500));
    let (_tx, rx) = watch::channel(false);

    let job = h
        .workflow()
        .run(two_video_job(SceneFailurePolicy::FailJob), rx)
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    let message = job.error_message.unwrap();
    assert!(message.contains("analysis.probe_inputs"), "{}", message);
    assert!(message.contains("timed out"), "{}", message);
    assert_eq!(h.ai.analyze_calls(), 0);

    let history = h.store.query_by_job(&job.id).await.unwrap();
    let probe_records: Vec<_> = history
        .iter()
        .filter(|r| r.sub_step == SubStepId::ProbeInputs)
        .map(|r| r.status)
        .collect();
    assert_eq!(probe_records, vec![StepStatus::Running, StepStatus::Failed]);
    assert_no_open_attempts(&history);
}

#[tokio::test]
async fn test_legacy_checkpoint_is_not_rerun() {
    let h = Harness::new(four_scenes());
    let job = two_video_job(SceneFailurePolicy::FailJob);
    h.store
        .upsert(
            &job.id,
            CheckpointPatch::default().with_final_output("/out/legacy.mp4"),
        )
        .await
        .unwrap();

    let (_tx, rx) = watch::channel(false);
    let job = h.workflow().run(job, rx).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert!(h.media.calls().is_empty());
    assert_eq!(h.ai.analyze_calls(), 0);
    let checkpoint = h.store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(checkpoint.final_output, Some("/out/legacy.mp4".into()));
}

#[tokio::test]
async fn test_queue_full_deletes_rejected_job() {
    let h = Harness::with_ai(FakeAi::new(four_scenes()));
    let queue = JobAdmissionQueue::new(QueueConfig {
        max_concurrent_jobs: 1,
    });
    let executor = JobExecutor::new(queue.clone(), h.workflow());
    let (_tx, rx) = watch::channel(false);

    let running = two_video_job(SceneFailurePolicy::FailJob);
    let ticket = queue.enqueue(&running.id, &running.spec).unwrap();

    let rejected = two_video_job(SceneFailurePolicy::FailJob);
    let err = executor.submit(rejected.clone(), rx.clone()).await.unwrap_err();
    assert!(err.is_queue_full());
    assert!(h.store.get_job(&rejected.id).await.unwrap().is_none());
    assert!(h.store.query_by_job(&rejected.id).await.unwrap().is_empty());

    ticket.release();
    let admitted = executor
        .submit(two_video_job(SceneFailurePolicy::FailJob), rx)
        .await
        .unwrap();
    assert_eq!(admitted.status, JobStatus::Completed);
    assert_eq!(executor.queue_status().running, 0);
}
