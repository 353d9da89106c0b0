//! Timestamp parsing and validation utilities.
//!
//! Scene bounds come back from the analyzer as strings like HH:MM:SS,
//! HH:MM:SS.mmm, MM:SS or plain seconds.

use thiserror::Error;

/// Maximum reasonable video duration (24 hours in seconds).
pub const MAX_VIDEO_DURATION_SECS: f64 = 86400.0;

/// Parse a timestamp string to total seconds.
///
/// # Examples
/// ```
/// use vnarr_models::timestamp::parse_timestamp;
/// assert_eq!(parse_timestamp("01:30:00").unwrap(), 5400.0);
/// assert_eq!(parse_timestamp("05:30").unwrap(), 330.0);
/// assert_eq!(parse_timestamp("90").unwrap(), 90.0);
/// ```
pub fn parse_timestamp(ts: &str) -> Result<f64, TimestampError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(TimestampError::Empty);
    }

    let parts: Vec<&str> = ts.split(':').collect();
    if parts.len() > 3 {
        return Err(TimestampError::InvalidFormat(ts.to_string()));
    }

    const NAMES: [&str; 3] = ["hours", "minutes", "seconds"];
    let offset = 3 - parts.len();
    let mut total = 0.0;
    for (i, part) in parts.iter().enumerate() {
        let component = NAMES[offset + i];
        let value: f64 = part
            .parse()
            .map_err(|_| TimestampError::InvalidValue(component, part.to_string()))?;
        if value < 0.0 {
            return Err(TimestampError::Negative);
        }
        total = total * 60.0 + value;
    }
    Ok(total)
}

/// Format seconds into HH:MM:SS or HH:MM:SS.mmm string.
pub fn format_seconds(total_secs: f64) -> String {
    let hours = (total_secs / 3600.0).floor() as u32;
    let mins = ((total_secs % 3600.0) / 60.0).floor() as u32;
    let secs = total_secs % 60.0;

    if (secs - secs.floor()).abs() > 0.0001 {
        format!("{:02}:{:02}:{:06.3}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs.floor() as u32)
    }
}

/// Format seconds as an SRT cue timestamp (`HH:MM:SS,mmm`).
pub fn format_srt_timestamp(total_secs: f64) -> String {
    let total_ms = (total_secs.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let mins = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let ms = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, mins, secs, ms)
}

/// Validated scene bounds in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneBounds {
    pub start_secs: f64,
    pub end_secs: f64,
}

impl SceneBounds {
    pub fn duration(&self) -> f64 {
        self.end_secs - self.start_secs
    }
}

/// Validate a start/end pair against the source duration (if known).
///
/// An end that overshoots the source by less than a second is clamped; the
/// analyzer rounds timestamps.
pub fn validate_bounds(
    start_secs: f64,
    end_secs: f64,
    video_duration: Option<f64>,
) -> Result<SceneBounds, TimestampError> {
    if start_secs < 0.0 || end_secs < 0.0 {
        return Err(TimestampError::Negative);
    }
    if start_secs >= end_secs {
        return Err(TimestampError::StartNotBeforeEnd);
    }
    if end_secs > MAX_VIDEO_DURATION_SECS {
        return Err(TimestampError::ExceedsMaxDuration(MAX_VIDEO_DURATION_SECS));
    }

    let mut end_secs = end_secs;
    if let Some(duration) = video_duration.filter(|d| *d > 0.0) {
        if end_secs > duration + 1.0 {
            return Err(TimestampError::ExceedsVideoDuration {
                end_secs,
                video_duration: duration,
            });
        }
        end_secs = end_secs.min(duration);
        if start_secs >= end_secs {
            return Err(TimestampError::StartNotBeforeEnd);
        }
    }

    Ok(SceneBounds {
        start_secs,
        end_secs,
    })
}

/// Timestamp parsing/validation error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimestampError {
    #[error("invalid timestamp: empty")]
    Empty,

    #[error("invalid timestamp: negative value")]
    Negative,

    #[error("invalid timestamp: bad {0} value '{1}'")]
    InvalidValue(&'static str, String),

    #[error("invalid timestamp format '{0}'. Use HH:MM:SS, HH:MM:SS.mmm, MM:SS, or SS")]
    InvalidFormat(String),

    #[error("invalid timestamp: start must be before end")]
    StartNotBeforeEnd,

    #[error("invalid timestamp: exceeds maximum allowed duration ({} hours)", .0 / 3600.0)]
    ExceedsMaxDuration(f64),

    #[error("invalid timestamp: end ({end_secs:.1}s) exceeds video duration ({video_duration:.1}s)")]
    ExceedsVideoDuration { end_secs: f64, video_duration: f64 },
}
