//! Job record and status lifecycle.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::event::truncate_trace;
use crate::kind::JobKind;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
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

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for a worker
    #[default]
    Pending,
    /// Job is being processed
    Processing,
    /// Job completed successfully
    Completed,
    /// Job failed with an error
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
        f.write_str(self.as_str())
    }
}

/// Structured error detail attached to a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Error message
    pub error: String,
    /// Optional truncated stack trace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl ErrorDetails {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            traceback: None,
        }
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    /// Apply the trace size bound so the payload fits on the event bus.
    pub fn truncated(mut self) -> Self {
        self.traceback = self.traceback.map(|t| truncate_trace(&t));
        self
    }
}

/// Rejected status transition.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// A unit of work tracked through the pipeline.
///
/// One record shape serves all stages; the stage is carried by `kind` and
/// `subject_id` points at the upstream artifact (video or transcript).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Pipeline stage this job belongs to
    pub kind: JobKind,

    /// Upstream artifact ID (video ID, transcript ID)
    pub subject_id: String,

    /// Current status
    #[serde(default)]
    pub status: JobStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Set exactly once, at the pending -> processing transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Set on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Wall-clock processing duration, set on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_seconds: Option<f64>,

    /// Error detail, set on failure and cleared by a retry reset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(kind: JobKind, subject_id: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            kind,
            subject_id: subject_id.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            processing_time_seconds: None,
            error_details: None,
        }
    }

    /// Transition pending -> processing.
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        if self.status != JobStatus::Pending {
            return Err(InvalidTransition {
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        self.status = JobStatus::Processing;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Transition processing -> completed.
    ///
    /// `completed_at` is derived from `started_at` plus the measured
    /// duration, so the three fields stay mutually consistent.
    pub fn complete(&mut self, processing_time_seconds: f64) -> Result<(), InvalidTransition> {
        if self.status != JobStatus::Processing {
            return Err(InvalidTransition {
                from: self.status,
                to: JobStatus::Completed,
            });
        }
        let elapsed = Duration::milliseconds((processing_time_seconds * 1000.0) as i64);
        self.status = JobStatus::Completed;
        self.completed_at = self.started_at.map(|t| t + elapsed).or_else(|| Some(Utc::now()));
        self.processing_time_seconds = Some(processing_time_seconds);
        Ok(())
    }

    /// Transition processing -> failed.
    pub fn fail(&mut self, details: ErrorDetails) -> Result<(), InvalidTransition> {
        if self.status != JobStatus::Processing {
            return Err(InvalidTransition {
                from: self.status,
                to: JobStatus::Failed,
            });
        }
        self.status = JobStatus::Failed;
        self.error_details = Some(details.truncated());
        Ok(())
    }

    /// Explicit retry: failed -> pending, clearing everything the previous
    /// attempt produced.
    pub fn reset_for_retry(&mut self) -> Result<(), InvalidTransition> {
        if self.status != JobStatus::Failed {
            return Err(InvalidTransition {
                from: self.status,
                to: JobStatus::Pending,
            });
        }
        self.status = JobStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.processing_time_seconds = None;
        self.error_details = None;
        Ok(())
    }
}
