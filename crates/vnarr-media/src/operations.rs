//! Media operation builders.
//!
//! Every builder is pure: it turns paths and timings into an
//! [`FfmpegCommand`] and never touches the filesystem. The encoding
//! parameters are shared so scene outputs can be concatenated with stream
//! copy.

use std::path::{Path, PathBuf};

use vnarr_models::OutputFormat;

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};

/// Slowest playback rate applied to a scene clip.
pub const MIN_SPEED_FACTOR: f64 = 0.5;

/// Fastest playback rate applied to a scene clip.
pub const MAX_SPEED_FACTOR: f64 = 2.0;

/// Speed changes smaller than this are not worth a re-encode.
const SPEED_TOLERANCE: f64 = 0.01;

/// Freeze-frame padding shorter than this is ignored.
const PAD_THRESHOLD_SECS: f64 = 0.01;

const VIDEO_CODEC: &str = "libx264";
const VIDEO_PRESET: &str = "veryfast";
const VIDEO_CRF: u8 = 20;
const AUDIO_CODEC: &str = "aac";
const AUDIO_BITRATE: &str = "128k";
const AUDIO_SAMPLE_RATE: &str = "44100";

/// Scale and pad any source to the normalized target.
pub fn normalize_filter(format: &OutputFormat) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps}",
        w = format.width,
        h = format.height,
        fps = format.fps
    )
}

/// Normalized H.264 video encoding shared by every re-encoding builder.
fn encode_video(cmd: FfmpegCommand, format: &OutputFormat) -> FfmpegCommand {
    cmd.frame_rate(format.fps)
        .video_codec(VIDEO_CODEC)
        .preset(VIDEO_PRESET)
        .crf(VIDEO_CRF)
        .output_args(["-pix_fmt", "yuv420p"])
}

/// Normalized stereo AAC audio.
fn encode_audio(cmd: FfmpegCommand) -> FfmpegCommand {
    cmd.audio_codec(AUDIO_CODEC)
        .audio_bitrate(AUDIO_BITRATE)
        .output_args(["-ar", AUDIO_SAMPLE_RATE, "-ac", "2"])
}

/// Cut `[start, start + duration)` out of `source`, re-encoded to the
/// normalized resolution and frame rate.
pub fn split_command(
    source: &Path,
    start_secs: f64,
    duration: f64,
    output: &Path,
    format: &OutputFormat,
) -> MediaResult<FfmpegCommand> {
    if start_secs < 0.0 || duration <= 0.0 {
        return Err(MediaError::invalid_operation(format!(
            "split needs a non-negative start and positive duration (start {:.3}, duration {:.3})",
            start_secs, duration
        )));
    }

    let cmd = FfmpegCommand::new(output)
        .input_with(["-ss".to_string(), format!("{:.3}", start_secs)], source)
        .duration(duration)
        .video_filter(normalize_filter(format));

    Ok(encode_audio(encode_video(cmd, format)))
}

/// Re-time a clip by `factor` (>1 plays faster). The audio track is dropped;
/// narration is merged afterwards.
pub fn speed_command(
    input: &Path,
    factor: f64,
    output: &Path,
    format: &OutputFormat,
) -> MediaResult<FfmpegCommand> {
    if !factor.is_finite() || factor <= 0.0 {
        return Err(MediaError::invalid_operation(format!(
            "speed factor must be positive, got {}",
            factor
        )));
    }

    let cmd = FfmpegCommand::new(output)
        .input(input)
        .video_filter(format!("setpts=PTS/{:.4}", factor))
        .no_audio();

    Ok(encode_video(cmd, format))
}

/// Put narration under a clip.
///
/// The output length follows the narration (`-t audio_duration`), never the
/// shortest stream, so narration is never truncated. A clip that is still
/// shorter than the narration is extended by cloning its last frame.
pub fn merge_command(
    video: &Path,
    audio: &Path,
    audio_duration: f64,
    pad_secs: f64,
    output: &Path,
    format: &OutputFormat,
) -> MediaResult<FfmpegCommand> {
    if audio_duration <= 0.0 {
        return Err(MediaError::invalid_operation(format!(
            "merge needs a positive audio duration, got {:.3}",
            audio_duration
        )));
    }

    let mut cmd = FfmpegCommand::new(output)
        .input(video)
        .input(audio)
        .map("0:v:0")
        .map("1:a:0");

    if pad_secs > PAD_THRESHOLD_SECS {
        cmd = cmd.video_filter(format!("tpad=stop_mode=clone:stop_duration={:.3}", pad_secs));
    }

    Ok(encode_audio(encode_video(cmd, format)).duration(audio_duration))
}

/// Normalize the kept source audio of a clip; video is stream-copied.
pub fn reencode_original_command(input: &Path, output: &Path) -> FfmpegCommand {
    encode_audio(
        FfmpegCommand::new(output)
            .input(input)
            .video_codec("copy")
            .audio_filter("loudnorm=I=-16:TP=-1.5:LRA=11"),
    )
}

/// Contents of a concat demuxer list file.
pub fn concat_list<P: AsRef<Path>>(paths: &[P]) -> String {
    paths
        .iter()
        .map(|p| {
            let path = p.as_ref().to_string_lossy().replace('\'', "'\\''");
            format!("file '{}'\n", path)
        })
        .collect()
}

/// Join the clips named in `list_file` with stream copy.
pub fn concat_command(list_file: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(output)
        .input_with(["-f", "concat", "-safe", "0"], list_file)
        .codec_copy()
}

/// Loop an audio track until it spans `duration` seconds.
pub fn loop_command(input: &Path, duration: f64, output: &Path) -> MediaResult<FfmpegCommand> {
    if duration <= 0.0 {
        return Err(MediaError::invalid_operation(format!(
            "loop needs a positive duration, got {:.3}",
            duration
        )));
    }

    Ok(encode_audio(
        FfmpegCommand::new(output)
            .input_with(["-stream_loop", "-1"], input)
            .duration(duration)
            .output_arg("-vn"),
    ))
}

/// Lay background music under the program audio. The program sets the
/// length (`duration=first`); the music is attenuated to `volume`.
pub fn mix_background_command(
    video: &Path,
    music: &Path,
    volume: f64,
    output: &Path,
) -> FfmpegCommand {
    let filter = format!(
        "[1:a]volume={:.3}[bg];[0:a][bg]amix=inputs=2:duration=first:dropout_transition=0[aout]",
        volume.max(0.0)
    );

    encode_audio(
        FfmpegCommand::new(output)
            .input(video)
            .input(music)
            .filter_complex(filter)
            .map("0:v:0")
            .map("[aout]")
            .video_codec("copy"),
    )
}

/// Burn an SRT file into the picture.
pub fn subtitle_command(
    video: &Path,
    subtitles: &Path,
    output: &Path,
    format: &OutputFormat,
) -> FfmpegCommand {
    let filter = format!(
        "subtitles={}",
        escape_filter_value(&subtitles.to_string_lossy())
    );

    encode_video(FfmpegCommand::new(output).input(video).video_filter(filter), format)
        .audio_codec("copy")
}

/// FFprobe arguments producing JSON format and stream information.
pub fn probe_args(path: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        "-show_format".to_string(),
        "-show_streams".to_string(),
        path.to_string_lossy().to_string(),
    ]
}

/// Escape a value embedded in a filter graph argument.
fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ':' | '\'' | ',' | ';' | '[' | ']') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Sibling path with a suffix before the extension (`clip.mp4` -> `clip_fast.mp4`).
pub fn derived_path(path: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!("{}_{}.{}", stem, suffix, extension))
}

/// How a clip is re-timed to span its narration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedPlan {
    /// Playback rate (`setpts=PTS/factor`)
    pub factor: f64,
    /// Freeze-frame padding still needed after the speed change
    pub pad_secs: f64,
}

impl SpeedPlan {
    pub fn needs_adjustment(&self) -> bool {
        (self.factor - 1.0).abs() >= SPEED_TOLERANCE
    }
}

/// Pick the speed factor that makes a clip of `video_secs` span
/// `audio_secs` of narration, within [`MIN_SPEED_FACTOR`, `MAX_SPEED_FACTOR`].
///
/// Whatever the clamp leaves uncovered becomes freeze-frame padding.
pub fn speed_plan(video_secs: f64, audio_secs: f64) -> SpeedPlan {
    if video_secs <= 0.0 || audio_secs <= 0.0 {
        return SpeedPlan {
            factor: 1.0,
            pad_secs: 0.0,
        };
    }

    let mut factor = (video_secs / audio_secs).clamp(MIN_SPEED_FACTOR, MAX_SPEED_FACTOR);
    if (factor - 1.0).abs() < SPEED_TOLERANCE {
        factor = 1.0;
    }

    let adjusted = video_secs / factor;
    SpeedPlan {
        factor,
        pad_secs: (audio_secs - adjusted).max(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> OutputFormat {
        OutputFormat {
            width: 1280,
            height: 720,
            fps: 30,
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_split_normalizes_frame_rate_and_resolution() {
        let args = split_command(
            Path::new("in.mp4"),
            10.0,
            12.0,
            Path::new("scene_1.mp4"),
            &target(),
        )
        .unwrap()
        .build_args();

        assert_eq!(value_after(&args, "-ss"), Some("10.000"));
        assert_eq!(value_after(&args, "-t"), Some("12.000"));
        assert_eq!(value_after(&args, "-r"), Some("30"));
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-c:a"), Some("aac"));

        let vf = value_after(&args, "-vf").unwrap();
        assert!(vf.contains("scale=1280:720"));
        assert!(vf.contains("pad=1280:720"));
        assert!(vf.contains("setsar=1"));
    }

    #[test]
    fn test_split_rejects_empty_segment() {
        let result = split_command(Path::new("in.mp4"), 5.0, 0.0, Path::new("o.mp4"), &target());
        assert!(matches!(result, Err(MediaError::InvalidOperation(_))));
    }

    #[test]
    fn test_speed_drops_audio() {
        let args = speed_command(Path::new("clip.mp4"), 1.25, Path::new("fast.mp4"), &target())
            .unwrap()
            .build_args();
        assert_eq!(value_after(&args, "-vf"), Some("setpts=PTS/1.2500"));
        assert!(args.contains(&"-an".to_string()));

        assert!(speed_command(Path::new("a"), 0.0, Path::new("b"), &target()).is_err());
    }

    #[test]
    fn test_merge_follows_audio_length() {
        let args = merge_command(
            Path::new("clip.mp4"),
            Path::new("voice.mp3"),
            9.5,
            0.0,
            Path::new("merged.mp4"),
            &target(),
        )
        .unwrap()
        .build_args();

        assert!(!args.contains(&"-shortest".to_string()));
        assert_eq!(value_after(&args, "-t"), Some("9.500"));
        assert!(value_after(&args, "-vf").is_none());
        let maps: Vec<_> = args
            .windows(2)
            .filter(|w| w[0] == "-map")
            .map(|w| w[1].as_str())
            .collect();
        assert_eq!(maps, vec!["0:v:0", "1:a:0"]);
    }

    #[test]
    fn test_merge_pads_short_video() {
        let args = merge_command(
            Path::new("clip.mp4"),
            Path::new("voice.mp3"),
            10.0,
            2.0,
            Path::new("merged.mp4"),
            &target(),
        )
        .unwrap()
        .build_args();
        assert_eq!(
            value_after(&args, "-vf"),
            Some("tpad=stop_mode=clone:stop_duration=2.000")
        );
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let list = concat_list(&[PathBuf::from("/work/a.mp4"), PathBuf::from("/work/it's.mp4")]);
        assert_eq!(list, "file '/work/a.mp4'\nfile '/work/it'\\''s.mp4'\n");

        let args = concat_command(Path::new("list.txt"), Path::new("final.mp4")).build_args();
        assert_eq!(value_after(&args, "-f"), Some("concat"));
        assert_eq!(value_after(&args, "-safe"), Some("0"));
        assert_eq!(value_after(&args, "-c"), Some("copy"));
    }

    #[test]
    fn test_loop_and_mix() {
        let args = loop_command(Path::new("music.mp3"), 42.0, Path::new("looped.m4a"))
            .unwrap()
            .build_args();
        assert_eq!(value_after(&args, "-stream_loop"), Some("-1"));
        assert_eq!(value_after(&args, "-t"), Some("42.000"));

        let args = mix_background_command(
            Path::new("final.mp4"),
            Path::new("looped.m4a"),
            0.15,
            Path::new("mixed.mp4"),
        )
        .build_args();
        let filter = value_after(&args, "-filter_complex").unwrap();
        assert!(filter.contains("volume=0.150"));
        assert!(filter.contains("duration=first"));
        assert_eq!(value_after(&args, "-c:v"), Some("copy"));
    }

    #[test]
    fn test_subtitle_path_escaped() {
        let args = subtitle_command(
            Path::new("final.mp4"),
            Path::new("/work/job:1/captions.srt"),
            Path::new("captioned.mp4"),
            &target(),
        )
        .build_args();
        assert_eq!(
            value_after(&args, "-vf"),
            Some("subtitles=/work/job\\:1/captions.srt")
        );
    }

    #[test]
    fn test_speed_plan() {
        let plan = speed_plan(12.0, 10.0);
        assert!((plan.factor - 1.2).abs() < 1e-9);
        assert_eq!(plan.pad_secs, 0.0);
        assert!(plan.needs_adjustment());

        // Clamped: 4s of video can only stretch to 8s
        let plan = speed_plan(4.0, 10.0);
        assert_eq!(plan.factor, MIN_SPEED_FACTOR);
        assert!((plan.pad_secs - 2.0).abs() < 1e-9);

        let plan = speed_plan(10.0, 10.05);
        assert_eq!(plan.factor, 1.0);
        assert!(!plan.needs_adjustment());

        assert_eq!(speed_plan(0.0, 3.0).factor, 1.0);
    }

    #[test]
    fn test_derived_path() {
        assert_eq!(
            derived_path(Path::new("/w/scene_3.mp4"), "fast", "mp4"),
            PathBuf::from("/w/scene_3_fast.mp4")
        );
    }
}
