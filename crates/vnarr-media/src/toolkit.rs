//! The media operations the workflow drives, behind a trait so tests can
//! substitute a fake.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use vnarr_models::OutputFormat;

use crate::error::{MediaError, MediaResult};
use crate::operations::{
    concat_command, concat_list, derived_path, loop_command, merge_command,
    mix_background_command, reencode_original_command, speed_command, split_command,
    subtitle_command,
};
use crate::probe::{probe_media, MediaInfo};
use crate::runner::{MediaRunner, RunOptions};

/// Cut one scene out of a source video.
#[derive(Debug, Clone)]
pub struct SplitRequest {
    pub source: PathBuf,
    pub start_secs: f64,
    pub duration: f64,
    pub output: PathBuf,
    pub format: OutputFormat,
}

/// Put narration under a (possibly re-timed) scene clip.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub audio_duration: f64,
    /// Freeze-frame padding appended to the video
    pub pad_secs: f64,
    pub output: PathBuf,
    pub format: OutputFormat,
}

/// Media operations used by the pipeline. Each returns the path it wrote.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    async fn probe(&self, path: &Path, opts: RunOptions) -> MediaResult<MediaInfo>;

    async fn split(&self, request: &SplitRequest, opts: RunOptions) -> MediaResult<PathBuf>;

    async fn reencode_original_audio(
        &self,
        input: &Path,
        output: &Path,
        opts: RunOptions,
    ) -> MediaResult<PathBuf>;

    async fn adjust_speed(
        &self,
        input: &Path,
        factor: f64,
        output: &Path,
        format: &OutputFormat,
        opts: RunOptions,
    ) -> MediaResult<PathBuf>;

    async fn merge(&self, request: &MergeRequest, opts: RunOptions) -> MediaResult<PathBuf>;

    async fn concatenate(
        &self,
        clips: &[PathBuf],
        output: &Path,
        opts: RunOptions,
    ) -> MediaResult<PathBuf>;

    async fn loop_to_duration(
        &self,
        input: &Path,
        duration: f64,
        output: &Path,
        opts: RunOptions,
    ) -> MediaResult<PathBuf>;

    async fn mix_background(
        &self,
        video: &Path,
        music: &Path,
        volume: f64,
        output: &Path,
        opts: RunOptions,
    ) -> MediaResult<PathBuf>;

    async fn burn_subtitles(
        &self,
        video: &Path,
        subtitles: &Path,
        output: &Path,
        format: &OutputFormat,
        opts: RunOptions,
    ) -> MediaResult<PathBuf>;
}

/// [`MediaToolkit`] backed by the FFmpeg and FFprobe binaries.
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffmpeg: MediaRunner,
    ffprobe: MediaRunner,
}

impl Default for FfmpegToolkit {
    fn default() -> Self {
        Self::new(MediaRunner::ffmpeg(), MediaRunner::ffprobe())
    }
}

impl FfmpegToolkit {
    pub fn new(ffmpeg: MediaRunner, ffprobe: MediaRunner) -> Self {
        Self { ffmpeg, ffprobe }
    }

    /// Toolkit for the given binaries, each invocation capped at `timeout`.
    pub fn with_binaries(
        ffmpeg: impl Into<PathBuf>,
        ffprobe: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self::new(
            MediaRunner::new(ffmpeg).with_default_timeout(timeout),
            MediaRunner::new(ffprobe).with_default_timeout(timeout),
        )
    }
}

fn require_file(path: &Path) -> MediaResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(MediaError::FileNotFound(path.to_path_buf()))
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, path: &Path, opts: RunOptions) -> MediaResult<MediaInfo> {
        probe_media(&self.ffprobe, path, opts).await
    }

    async fn split(&self, request: &SplitRequest, opts: RunOptions) -> MediaResult<PathBuf> {
        require_file(&request.source)?;

        info!(
            "Splitting scene: {} -> {} (start: {:.2}s, duration: {:.2}s)",
            request.source.display(),
            request.output.display(),
            request.start_secs,
            request.duration
        );

        let cmd = split_command(
            &request.source,
            request.start_secs,
            request.duration,
            &request.output,
            &request.format,
        )?;
        self.ffmpeg.run_command(&cmd, opts).await?;
        Ok(request.output.clone())
    }

    async fn reencode_original_audio(
        &self,
        input: &Path,
        output: &Path,
        opts: RunOptions,
    ) -> MediaResult<PathBuf> {
        require_file(input)?;
        debug!("Normalizing original audio: {}", input.display());

        let cmd = reencode_original_command(input, output);
        self.ffmpeg.run_command(&cmd, opts).await?;
        Ok(output.to_path_buf())
    }

    async fn adjust_speed(
        &self,
        input: &Path,
        factor: f64,
        output: &Path,
        format: &OutputFormat,
        opts: RunOptions,
    ) -> MediaResult<PathBuf> {
        require_file(input)?;
        debug!("Adjusting speed x{:.3}: {}", factor, input.display());

        let cmd = speed_command(input, factor, output, format)?;
        self.ffmpeg.run_command(&cmd, opts).await?;
        Ok(output.to_path_buf())
    }

    async fn merge(&self, request: &MergeRequest, opts: RunOptions) -> MediaResult<PathBuf> {
        require_file(&request.video)?;
        require_file(&request.audio)?;
        debug!(
            "Merging narration {} into {} ({:.2}s)",
            request.audio.display(),
            request.video.display(),
            request.audio_duration
        );

        let cmd = merge_command(
            &request.video,
            &request.audio,
            request.audio_duration,
            request.pad_secs,
            &request.output,
            &request.format,
        )?;
        self.ffmpeg.run_command(&cmd, opts).await?;
        Ok(request.output.clone())
    }

    async fn concatenate(
        &self,
        clips: &[PathBuf],
        output: &Path,
        opts: RunOptions,
    ) -> MediaResult<PathBuf> {
        if clips.is_empty() {
            return Err(MediaError::invalid_operation("nothing to concatenate"));
        }
        for clip in clips {
            require_file(clip)?;
        }

        let list_file = derived_path(output, "concat", "txt");
        tokio::fs::write(&list_file, concat_list(clips)).await?;

        info!("Concatenating {} clips -> {}", clips.len(), output.display());
        let cmd = concat_command(&list_file, output);
        let result = self.ffmpeg.run_command(&cmd, opts).await;

        let _ = tokio::fs::remove_file(&list_file).await;
        result?;
        Ok(output.to_path_buf())
    }

    async fn loop_to_duration(
        &self,
        input: &Path,
        duration: f64,
        output: &Path,
        opts: RunOptions,
    ) -> MediaResult<PathBuf> {
        require_file(input)?;

        let cmd = loop_command(input, duration, output)?;
        self.ffmpeg.run_command(&cmd, opts).await?;
        Ok(output.to_path_buf())
    }

    async fn mix_background(
        &self,
        video: &Path,
        music: &Path,
        volume: f64,
        output: &Path,
        opts: RunOptions,
    ) -> MediaResult<PathBuf> {
        require_file(video)?;
        require_file(music)?;
        info!("Mixing background music {} at {:.2}", music.display(), volume);

        let cmd = mix_background_command(video, music, volume, output);
        self.ffmpeg.run_command(&cmd, opts).await?;
        Ok(output.to_path_buf())
    }

    async fn burn_subtitles(
        &self,
        video: &Path,
        subtitles: &Path,
        output: &Path,
        format: &OutputFormat,
        opts: RunOptions,
    ) -> MediaResult<PathBuf> {
        require_file(video)?;
        require_file(subtitles)?;
        info!("Burning subtitles {} -> {}", subtitles.display(), output.display());

        let cmd = subtitle_command(video, subtitles, output, format);
        self.ffmpeg.run_command(&cmd, opts).await?;
        Ok(output.to_path_buf())
    }
}
