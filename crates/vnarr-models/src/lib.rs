//! Shared data models for the vnarr narration pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their workflow specification
//! - Major stages, sub-steps and append-only step records
//! - Typed per-sub-step payloads
//! - The mutable job checkpoint
//! - Scene tasks and their per-scene results

pub mod checkpoint;
pub mod error_category;
pub mod job;
pub mod payload;
pub mod scene;
pub mod spec;
pub mod step;
pub mod timestamp;

// Re-export common types
pub use checkpoint::{CheckpointPatch, JobCheckpoint};
pub use error_category::ErrorCategory;
pub use job::{InputVideo, Job, JobId, JobStatus};
pub use payload::{NarrationAssignment, ProbedInput, StepPayload};
pub use scene::{SceneId, SceneResult, SceneStatus, SceneTask};
pub use spec::{
    OutputFormat, SceneFailurePolicy, SpecError, TargetPlatform, VoiceConfig, WorkflowSpec,
    MAX_INPUT_VIDEOS, MAX_SCENE_CONCURRENCY,
};
pub use step::{StageId, StepKey, StepRecord, StepStatus, SubStepId};
