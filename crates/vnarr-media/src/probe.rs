//! FFprobe media information.

use serde::{Deserialize, Serialize};
use std::path::Path;

use vnarr_models::ProbedInput;

use crate::error::{MediaError, MediaResult};
use crate::operations::probe_args;
use crate::runner::{MediaFailure, MediaRunner, RunOptions};

/// Media file information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels (0 for audio-only files)
    pub width: u32,
    /// Height in pixels (0 for audio-only files)
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Video codec
    pub codec: String,
    /// Whether an audio stream is present
    pub has_audio: bool,
    /// File size in bytes
    pub size: u64,
    /// Bitrate in bits/second
    pub bitrate: u64,
}

impl MediaInfo {
    pub fn has_video(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Summary recorded for input video `index`.
    pub fn to_probed_input(&self, index: usize) -> ProbedInput {
        ProbedInput {
            index,
            duration: self.duration,
            width: self.width,
            height: self.height,
            fps: self.fps,
            has_audio: self.has_audio,
        }
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

/// Probe a media file through `runner` (an FFprobe runner).
pub async fn probe_media(
    runner: &MediaRunner,
    path: impl AsRef<Path>,
    opts: RunOptions,
) -> MediaResult<MediaInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let result = runner.run(&probe_args(path), opts).await;
    match &result.failure {
        Some(MediaFailure::ExitStatus { .. }) => Err(MediaError::FfprobeFailed {
            message: result
                .last_diagnostic()
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| format!("FFprobe failed on {}", path.display())),
            stderr: Some(result.stderr_tail.clone()),
        }),
        Some(MediaFailure::NotFound(_)) => Err(MediaError::FfprobeNotFound),
        _ => result
            .into_result()
            .and_then(|done| parse_probe_output(&done.stdout)),
    }
}

/// Parse FFprobe's JSON output.
pub fn parse_probe_output(stdout: &[u8]) -> MediaResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let video_stream = probe.streams.iter().find(|s| s.codec_type == "video");
    let audio_stream = probe.streams.iter().find(|s| s.codec_type == "audio");

    if video_stream.is_none() && audio_stream.is_none() {
        return Err(MediaError::InvalidVideo(
            "no video stream or audio stream found".to_string(),
        ));
    }

    // Container duration, falling back to the first stream that reports one
    let duration = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| {
            probe
                .streams
                .iter()
                .find_map(|s| s.duration.as_deref().and_then(|d| d.parse::<f64>().ok()))
        })
        .unwrap_or(0.0);

    let size = probe
        .format
        .size
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let bitrate = probe
        .format
        .bit_rate
        .as_deref()
        .and_then(|b| b.parse::<u64>().ok())
        .unwrap_or(0);

    let fps = video_stream
        .and_then(|v| v.avg_frame_rate.as_deref().or(v.r_frame_rate.as_deref()))
        .and_then(parse_frame_rate)
        .unwrap_or(0.0);

    Ok(MediaInfo {
        duration,
        width: video_stream.and_then(|v| v.width).unwrap_or(0),
        height: video_stream.and_then(|v| v.height).unwrap_or(0),
        fps,
        codec: video_stream
            .and_then(|v| v.codec_name.clone())
            .unwrap_or_default(),
        has_audio: audio_stream.is_some(),
        size,
        bitrate,
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok()
}
