//! Upstream subject and artifact records exchanged with the job store.

use serde::{Deserialize, Serialize};

/// A timed transcript segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: u32,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
}

/// Video record, the subject of transcription jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Transcript record, the subject of summarization and translation jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub id: String,
    pub video_id: String,
    pub content: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Minimal view of a created artifact; only the ID feeds back into events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedArtifact {
    pub id: String,
}
