#![deny(unreachable_patterns)]
//! FFmpeg CLI executor for the narration pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multiple inputs
//! - A shared process runner with timeout, cancellation and progress parsing
//!   from `-progress pipe:2`
//! - Pure argument builders for split, speed-adjust, merge, concatenate,
//!   probe, subtitle-burn, background-music mix and loop
//! - The [`MediaToolkit`] seam the workflow executor drives

pub mod command;
pub mod error;
pub mod operations;
pub mod probe;
pub mod progress;
pub mod runner;
pub mod subtitles;
pub mod toolkit;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand};
pub use error::{MediaError, MediaResult};
pub use operations::{speed_plan, SpeedPlan, MAX_SPEED_FACTOR, MIN_SPEED_FACTOR};
pub use probe::{probe_media, MediaInfo};
pub use progress::{FfmpegProgress, ProgressCallback};
pub use runner::{MediaFailure, MediaOperationResult, MediaRunner, RunOptions};
pub use subtitles::{build_srt, SubtitleCue};
pub use toolkit::{FfmpegToolkit, MediaToolkit, MergeRequest, SplitRequest};
