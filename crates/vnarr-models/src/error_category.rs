//! Error categories shared between the classifier and the job record.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Network, timeout, rate limit, resource exhaustion
    Retryable,
    /// Credentials, permissions, model availability
    Config,
    /// Malformed, oversized or unsupported media
    Input,
    /// Storage, database, filesystem
    System,
    /// Nothing matched
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Retryable => "retryable",
            ErrorCategory::Config => "config",
            ErrorCategory::Input => "input",
            ErrorCategory::System => "system",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
