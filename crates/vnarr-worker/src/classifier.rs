//! Error classification.
//!
//! A stateless mapping from an error message to a category, a retry verdict
//! and user guidance. Patterns are matched against the lowercased message in
//! a fixed order (config, input, retryable, system); the first group with a
//! hit wins and anything unmatched is `unknown`, which is retried.
//!
//! HTTP status codes only count when they appear as a status, so job ids,
//! paths and durations that happen to contain "401" or "503" do not match.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use vnarr_models::ErrorCategory;

use crate::error::WorkerError;

const CONFIG_PATTERNS: &[&str] = &[
    "invalid api key",
    "api key not valid",
    "unauthorized",
    "forbidden",
    "permission denied",
    "credential",
    "model not found",
    "not found in path",
    "configuration error",
];

const INPUT_PATTERNS: &[&str] = &[
    "invalid input",
    "invalid data",
    "invalid video",
    "unsupported format",
    "malformed",
    "too large",
    "no video stream",
    "invalid timestamp",
    "moov atom not found",
];

const RETRYABLE_PATTERNS: &[&str] = &[
    "network",
    "connection",
    "timeout",
    "timed out",
    "rate limit",
    "too many requests",
    "resource exhausted",
    "resource_exhausted",
    "temporarily unavailable",
    "service unavailable",
];

const SYSTEM_PATTERNS: &[&str] = &[
    "database",
    "storage",
    "no space left",
    "disk full",
    "redis",
    "i/o error",
    "file not found",
];

/// Classification result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub is_retryable: bool,
    /// What the user can do about it
    pub guidance: String,
}

static CONFIG_STATUS: LazyLock<Regex> = LazyLock::new(|| status_pattern("401|403"));
static RETRYABLE_STATUS: LazyLock<Regex> = LazyLock::new(|| status_pattern("429|503"));

/// A status code as a whole token following "returned", "status", "http" or
/// "code" (e.g. "AI service returned 429: ...", "HTTP 503").
fn status_pattern(codes: &str) -> Regex {
    Regex::new(&format!(r"\b(?:returned|status|http|code)\W{{0,3}}(?:{codes})\b"))
        .expect("status code pattern is valid")
}

fn matches_any(message: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| message.contains(p))
}

/// Classify an error message.
pub fn classify(message: &str) -> ErrorClassification {
    let lower = message.to_lowercase();

    let category = if matches_any(&lower, CONFIG_PATTERNS) || CONFIG_STATUS.is_match(&lower) {
        ErrorCategory::Config
    } else if matches_any(&lower, INPUT_PATTERNS) {
        ErrorCategory::Input
    } else if matches_any(&lower, RETRYABLE_PATTERNS) || RETRYABLE_STATUS.is_match(&lower) {
        ErrorCategory::Retryable
    } else if matches_any(&lower, SYSTEM_PATTERNS) {
        ErrorCategory::System
    } else {
        ErrorCategory::Unknown
    };

    ErrorClassification {
        category,
        is_retryable: is_retryable(category),
        guidance: guidance(category).to_string(),
    }
}

/// Classify a worker error by its full source chain.
pub fn classify_error(err: &WorkerError) -> ErrorClassification {
    classify(&err.chain().join(": "))
}

fn is_retryable(category: ErrorCategory) -> bool {
    match category {
        ErrorCategory::Retryable | ErrorCategory::System | ErrorCategory::Unknown => true,
        ErrorCategory::Config | ErrorCategory::Input => false,
    }
}

fn guidance(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Retryable => {
            "A temporary service or network problem interrupted processing. Try again in a few minutes."
        }
        ErrorCategory::Config => {
            "The worker is misconfigured. Check API credentials, model availability and media binary paths."
        }
        ErrorCategory::Input => {
            "An input video could not be processed. Check that it is a valid, supported and reasonably sized file."
        }
        ErrorCategory::System => {
            "Storage or the filesystem failed. Check free disk space and database connectivity, then retry."
        }
        ErrorCategory::Unknown => {
            "An unexpected error occurred. Retry the job; contact support if it keeps failing."
        }
    }
}
