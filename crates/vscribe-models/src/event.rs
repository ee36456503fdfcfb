//! Event payloads, topics, and payload size bounding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::JobStatus;
use crate::kind::JobKind;

/// A new video landed and is ready for transcription.
pub const TOPIC_VIDEO_CREATED: &str = "video.created";
/// A transcript artifact was produced.
pub const TOPIC_TRANSCRIPTION_CREATED: &str = "transcription.created";
/// A summary artifact was produced.
pub const TOPIC_SUMMARY_CREATED: &str = "summary.created";
/// A job changed status.
pub const TOPIC_JOB_STATUS_CHANGED: &str = "job.status.changed";

/// Upper bound on a serialized event payload.
pub const MAX_PAYLOAD_BYTES: usize = 100_000;
/// Prefix length kept when a trace string is truncated.
pub const MAX_TRACE_CHARS: usize = 1000;
/// Marker appended to truncated strings.
pub const TRUNCATION_MARKER: &str = "... (truncated)";

/// Payload for `video.created`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoCreated {
    pub video_id: String,
    pub filename: String,
}

/// Payload for `transcription.created`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionCreated {
    pub transcript_id: String,
    pub video_id: String,
}

/// Payload for `summary.created`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryCreated {
    pub summary_id: String,
    pub transcript_id: String,
}

/// Payload for `job.status.changed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusChanged {
    pub job_type: JobKind,
    pub job_id: String,
    pub status: JobStatus,
}

/// Truncate a trace string to a bounded prefix plus marker.
///
/// Idempotent: a string already within the bound (including one produced by
/// a previous truncation) is returned unchanged.
pub fn truncate_trace(s: &str) -> String {
    if s.len() <= MAX_TRACE_CHARS + TRUNCATION_MARKER.len() {
        return s.to_string();
    }
    let cut = s
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= MAX_TRACE_CHARS)
        .last()
        .unwrap_or(0);
    format!("{}{}", &s[..cut], TRUNCATION_MARKER)
}

/// Bound a JSON payload to [`MAX_PAYLOAD_BYTES`] before publishing.
///
/// Oversized payloads get their known large string fields (`traceback` at the
/// top level and inside `error_details`) truncated deterministically. The
/// payload is never dropped; if it is still oversized after truncation the
/// caller publishes it as-is and the transport reports the failure.
pub fn bound_payload(payload: &mut Value) {
    let serialized_len = serde_json::to_string(payload).map(|s| s.len()).unwrap_or(0);
    if serialized_len <= MAX_PAYLOAD_BYTES {
        return;
    }

    if let Some(obj) = payload.as_object_mut() {
        if let Some(Value::String(trace)) = obj.get_mut("traceback") {
            *trace = truncate_trace(trace);
        }
        if let Some(Value::Object(details)) = obj.get_mut("error_details") {
            if let Some(Value::String(trace)) = details.get_mut("traceback") {
                *trace = truncate_trace(trace);
            }
        }
    }
}
