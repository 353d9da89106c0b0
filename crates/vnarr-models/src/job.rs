//! Job definitions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::{ErrorCategory, WorkflowSpec};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet admitted or not yet started
    #[default]
    Pending,
    /// Driven by the workflow executor
    Processing,
    /// All sub-steps reached a terminal state
    Completed,
    /// Absorbing failure state
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A source video attached to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InputVideo {
    /// Local path of the uploaded video
    pub path: PathBuf,

    /// Optional display title, passed to the analyzer as a hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl InputVideo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            title: None,
        }
    }
}

/// A narration job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Current lifecycle status
    #[serde(default)]
    pub status: JobStatus,

    /// Input videos (1-5)
    pub videos: Vec<InputVideo>,

    /// Selected style and workflow configuration
    pub spec: WorkflowSpec,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Started at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Completed at timestamp (set on success and on terminal failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Terminal error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Classified category of the terminal error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,

    /// User-facing guidance for the terminal error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_guidance: Option<String>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(videos: Vec<InputVideo>, spec: WorkflowSpec) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            videos,
            spec,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
            error_category: None,
            error_guidance: None,
        }
    }

    /// Mark the job as processing. The original start time survives a resume.
    pub fn mark_started(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Processing;
        self.started_at.get_or_insert(now);
        self.completed_at = None;
        self.updated_at = now;
        self.error_message = None;
        self.error_category = None;
        self.error_guidance = None;
    }

    pub fn mark_completed(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_failed(
        &mut self,
        message: impl Into<String>,
        category: Option<ErrorCategory>,
        guidance: Option<String>,
    ) {
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.completed_at = Some(now);
        self.updated_at = now;
        self.error_message = Some(message.into());
        self.error_category = category;
        self.error_guidance = guidance;
    }

    pub fn video_count(&self) -> usize {
        self.videos.len()
    }
}
