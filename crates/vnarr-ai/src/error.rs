//! AI client error types.

use thiserror::Error;

pub type AiResult<T> = Result<T, AiError>;

/// Messages are worded so the worker's error classifier can categorize them.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI service network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("AI service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("AI service response could not be parsed: {0}")]
    Decode(String),

    #[error("AI service credential missing: {0}")]
    MissingCredential(String),

    #[error("invalid input for AI service: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AiError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            AiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
