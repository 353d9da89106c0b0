//! SRT caption generation for burned-in subtitles.

use vnarr_models::timestamp::format_srt_timestamp;

/// Longest caption line before wrapping.
const MAX_LINE_CHARS: usize = 42;

/// One caption shown between `start` and `end` seconds of the final cut.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleCue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl SubtitleCue {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Render cues as an SRT document. Cues with blank text or no duration are
/// dropped; numbering stays contiguous.
pub fn build_srt(cues: &[SubtitleCue]) -> String {
    let mut out = String::new();
    let mut index = 0;

    for cue in cues {
        let text = cue.text.trim();
        if text.is_empty() || cue.end <= cue.start {
            continue;
        }
        index += 1;
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index,
            format_srt_timestamp(cue.start),
            format_srt_timestamp(cue.end),
            wrap_caption(text)
        ));
    }

    out
}

/// Greedy word wrap at [`MAX_LINE_CHARS`].
fn wrap_caption(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > MAX_LINE_CHARS {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_srt_numbering_skips_blank_cues() {
        let srt = build_srt(&[
            SubtitleCue::new(0.0, 2.5, "Opening shot"),
            SubtitleCue::new(2.5, 4.0, "   "),
            SubtitleCue::new(4.0, 6.25, "Second line"),
        ]);

        assert_eq!(
            srt,
            "1\n00:00:00,000 --> 00:00:02,500\nOpening shot\n\n\
             2\n00:00:04,000 --> 00:00:06,250\nSecond line\n\n"
        );
    }

    #[test]
    fn test_long_captions_wrap() {
        let text = "the quick brown fox jumps over the lazy dog and keeps running far away";
        let wrapped = wrap_caption(text);
        assert!(wrapped.lines().count() > 1);
        assert!(wrapped.lines().all(|l| l.chars().count() <= MAX_LINE_CHARS));
    }
}
