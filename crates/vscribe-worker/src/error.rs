//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("No inference model available, tried: {0}")]
    EngineUnavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] vscribe_store::StoreError),

    #[error("Event bus error: {0}")]
    Events(#[from] vscribe_events::EventBusError),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    /// Check if error is retryable on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Store(e) => e.is_retryable(),
            WorkerError::Events(e) => e.is_transport(),
            _ => false,
        }
    }
}
