//! Shared data models for the vscribe pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their status lifecycle
//! - Pipeline stages (job kinds) and their routing metadata
//! - Event payloads and topic constants
//! - Payload size bounding for the event bus

pub mod artifact;
pub mod event;
pub mod job;
pub mod kind;

// Re-export common types
pub use artifact::{CreatedArtifact, Segment, TranscriptRecord, VideoRecord};
pub use event::{
    bound_payload, truncate_trace, JobStatusChanged, SummaryCreated, TranscriptionCreated,
    VideoCreated, MAX_PAYLOAD_BYTES, MAX_TRACE_CHARS, TOPIC_JOB_STATUS_CHANGED,
    TOPIC_SUMMARY_CREATED, TOPIC_TRANSCRIPTION_CREATED, TOPIC_VIDEO_CREATED, TRUNCATION_MARKER,
};
pub use job::{ErrorDetails, InvalidTransition, Job, JobId, JobStatus};
pub use kind::JobKind;
