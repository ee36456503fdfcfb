//! Event bus error types.

use thiserror::Error;

pub type EventBusResult<T> = Result<T, EventBusError>;

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("Connection failed after {attempts} attempts: {reason}")]
    ConnectionFailed { attempts: u32, reason: String },

    #[error("Publish to '{topic}' failed after {attempts} attempts: {reason}")]
    PublishFailed {
        topic: String,
        attempts: u32,
        reason: String,
    },

    #[error("Subscribe to '{topic}' failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EventBusError {
    /// Transport-level errors the caller may retry or degrade around.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            EventBusError::ConnectionFailed { .. }
                | EventBusError::PublishFailed { .. }
                | EventBusError::Redis(_)
        )
    }
}
