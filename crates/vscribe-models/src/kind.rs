//! Pipeline stages and their routing metadata.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::event::{TOPIC_SUMMARY_CREATED, TOPIC_TRANSCRIPTION_CREATED, TOPIC_VIDEO_CREATED};

/// Which pipeline stage a job belongs to.
///
/// Kind-specific endpoints, topics and status values all hang off this enum
/// so a single dispatch worker can serve any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Transcription,
    Summarization,
    Translation,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Transcription => "transcription",
            JobKind::Summarization => "summarization",
            JobKind::Translation => "translation",
        }
    }

    /// Job store path segment for this kind's job endpoints.
    pub fn job_path(&self) -> &'static str {
        match self {
            JobKind::Transcription => "transcription-jobs",
            JobKind::Summarization => "summarization-jobs",
            JobKind::Translation => "translation-jobs",
        }
    }

    /// Job store path segment for this kind's upstream subject.
    pub fn subject_path(&self) -> &'static str {
        match self {
            JobKind::Transcription => "videos",
            JobKind::Summarization | JobKind::Translation => "transcripts",
        }
    }

    /// JSON field naming the subject in job-creation requests.
    pub fn subject_field(&self) -> &'static str {
        match self {
            JobKind::Transcription => "video_id",
            JobKind::Summarization | JobKind::Translation => "transcript_id",
        }
    }

    /// Topic announcing that a subject for this kind exists.
    pub fn creation_topic(&self) -> &'static str {
        match self {
            JobKind::Transcription => TOPIC_VIDEO_CREATED,
            JobKind::Summarization => TOPIC_TRANSCRIPTION_CREATED,
            JobKind::Translation => TOPIC_SUMMARY_CREATED,
        }
    }

    /// Topic this kind publishes when it produces an artifact, if any.
    ///
    /// Translation is the last stage and only emits a status change.
    pub fn artifact_topic(&self) -> Option<&'static str> {
        match self {
            JobKind::Transcription => Some(TOPIC_TRANSCRIPTION_CREATED),
            JobKind::Summarization => Some(TOPIC_SUMMARY_CREATED),
            JobKind::Translation => None,
        }
    }

    /// Status written to the subject record on success.
    pub fn subject_status_on_success(&self) -> &'static str {
        match self {
            JobKind::Transcription => "transcribed",
            JobKind::Summarization => "summarized",
            JobKind::Translation => "translated",
        }
    }

    /// Status written to the subject record when processing fails.
    pub fn subject_status_on_failure(&self) -> &'static str {
        "error"
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcription" => Ok(JobKind::Transcription),
            "summarization" => Ok(JobKind::Summarization),
            "translation" => Ok(JobKind::Translation),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrips_through_str() {
        for kind in [
            JobKind::Transcription,
            JobKind::Summarization,
            JobKind::Translation,
        ] {
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
        }
        assert!("render".parse::<JobKind>().is_err());
    }

    #[test]
    fn stage_chaining_topics() {
        // Each stage's artifact topic is the next stage's creation topic.
        assert_eq!(
            JobKind::Transcription.artifact_topic(),
            Some(JobKind::Summarization.creation_topic())
        );
        assert_eq!(
            JobKind::Summarization.artifact_topic(),
            Some(JobKind::Translation.creation_topic())
        );
        assert_eq!(JobKind::Translation.artifact_topic(), None);
    }
}
