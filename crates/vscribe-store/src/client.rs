//! Job store HTTP client.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use vscribe_models::{
    CreatedArtifact, ErrorDetails, Job, JobKind, Segment, TranscriptRecord, VideoRecord,
};

use crate::error::{StoreError, StoreResult};

/// Configuration for the job store client.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL of the job store API
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("API_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            timeout: Duration::from_secs(
                std::env::var("API_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}

/// Typed client for the job store's CRUD contract.
///
/// Every call can fail with a network or HTTP error; callers decide whether
/// a failed call is retried (claiming) or logged and left for the next poll
/// cycle to reconcile (status writes).
pub struct JobStore {
    http: Client,
    config: StoreConfig,
}

impl JobStore {
    /// Create a new store client.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(StoreError::Network)?;
        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(StoreConfig::from_env())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> StoreResult<T> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::RequestFailed {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Claim the oldest pending job of `kind`, FIFO by creation time.
    ///
    /// "No content" (404 or 204) maps to `Ok(None)`.
    pub async fn claim_next(&self, kind: JobKind) -> StoreResult<Option<Job>> {
        let url = self.url(&format!("{}/next", kind.job_path()));
        let response = self.http.get(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            _ => Ok(Some(Self::parse(response).await?)),
        }
    }

    /// Fetch a job by ID.
    pub async fn get_job(&self, kind: JobKind, job_id: &str) -> StoreResult<Job> {
        let url = self.url(&format!("{}/{}", kind.job_path(), job_id));
        let response = self.http.get(&url).send().await?;
        Self::parse(response).await
    }

    /// All pending jobs of `kind` (startup drain). 404 maps to empty.
    pub async fn list_pending(&self, kind: JobKind) -> StoreResult<Vec<Job>> {
        let url = self.url(&format!("{}?status=pending", kind.job_path()));
        let response = self.http.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        Self::parse(response).await
    }

    /// Create a job of `kind` for the given subject.
    pub async fn create_job(&self, kind: JobKind, subject_id: &str) -> StoreResult<Job> {
        let url = self.url(&format!("{}/", kind.job_path()));
        let body = json!({ kind.subject_field(): subject_id });
        let response = self.http.post(&url).json(&body).send().await?;
        let job: Job = Self::parse(response).await?;
        info!("Created {} job {} for {}", kind, job.id, subject_id);
        Ok(job)
    }

    /// Apply the pending -> processing transition.
    pub async fn mark_started(&self, job: &Job) -> StoreResult<Job> {
        let url = self.url(&format!("{}/{}/start", job.kind.job_path(), job.id));
        let response = self.http.post(&url).json(&json!({})).send().await?;
        let updated: Job = Self::parse(response).await?;
        debug!("Marked {} job {} started", job.kind, job.id);
        Ok(updated)
    }

    /// Apply the processing -> completed transition.
    pub async fn mark_completed(&self, job: &Job, processing_time: f64) -> StoreResult<Job> {
        let url = self.url(&format!("{}/{}/complete", job.kind.job_path(), job.id));
        let body = json!({ "processing_time_seconds": processing_time });
        let response = self.http.post(&url).json(&body).send().await?;
        let updated: Job = Self::parse(response).await?;
        info!(
            "Marked {} job {} completed in {:.2}s",
            job.kind, job.id, processing_time
        );
        Ok(updated)
    }

    /// Apply the processing -> failed transition.
    pub async fn mark_failed(&self, job: &Job, details: &ErrorDetails) -> StoreResult<Job> {
        let url = self.url(&format!("{}/{}/fail", job.kind.job_path(), job.id));
        let body = json!({ "error_details": details.clone().truncated() });
        let response = self.http.post(&url).json(&body).send().await?;
        let updated: Job = Self::parse(response).await?;
        info!("Marked {} job {} failed: {}", job.kind, job.id, details.error);
        Ok(updated)
    }

    /// Update the status field of the upstream artifact.
    pub async fn update_subject_status(
        &self,
        kind: JobKind,
        subject_id: &str,
        status: &str,
    ) -> StoreResult<()> {
        let url = self.url(&format!("{}/{}", kind.subject_path(), subject_id));
        let response = self
            .http
            .patch(&url)
            .json(&json!({ "status": status }))
            .send()
            .await?;
        let _: serde_json::Value = Self::parse(response).await?;
        debug!("Subject {} status updated to {}", subject_id, status);
        Ok(())
    }

    /// Fetch the video behind a transcription job.
    pub async fn get_video(&self, video_id: &str) -> StoreResult<VideoRecord> {
        let url = self.url(&format!("videos/{video_id}"));
        let response = self.http.get(&url).send().await?;
        Self::parse(response).await
    }

    /// Fetch the transcript behind a summarization or translation job.
    pub async fn get_transcript(&self, transcript_id: &str) -> StoreResult<TranscriptRecord> {
        let url = self.url(&format!("transcripts/{transcript_id}"));
        let response = self.http.get(&url).send().await?;
        Self::parse(response).await
    }

    /// Create a transcript artifact. The store also creates the downstream
    /// summarization job; this core only publishes the artifact event.
    pub async fn create_transcript(
        &self,
        video_id: &str,
        content: &str,
        segments: &[Segment],
    ) -> StoreResult<CreatedArtifact> {
        let url = self.url("transcripts/");
        let body = json!({
            "video_id": video_id,
            "source_type": "video",
            "content": content,
            "format": "txt",
            "status": "completed",
            "segments": segments,
        });
        let response = self.http.post(&url).json(&body).send().await?;
        let artifact: CreatedArtifact = Self::parse(response).await?;
        info!("Created transcript {} for video {}", artifact.id, video_id);
        Ok(artifact)
    }

    /// Create a summary artifact.
    pub async fn create_summary(
        &self,
        transcript_id: &str,
        content: &str,
    ) -> StoreResult<CreatedArtifact> {
        let url = self.url("summaries/");
        let body = json!({
            "transcript_id": transcript_id,
            "content": content,
            "status": "completed",
        });
        let response = self.http.post(&url).json(&body).send().await?;
        let artifact: CreatedArtifact = Self::parse(response).await?;
        info!(
            "Created summary {} for transcript {}",
            artifact.id, transcript_id
        );
        Ok(artifact)
    }

    /// Create a translated transcript artifact.
    pub async fn create_translation(
        &self,
        transcript_id: &str,
        language: &str,
        content: &str,
        segments: &[Segment],
    ) -> StoreResult<CreatedArtifact> {
        let url = self.url("translated-transcripts/");
        let body = json!({
            "transcript_id": transcript_id,
            "language": language,
            "content": content,
            "segments": segments,
            "status": "completed",
        });
        let response = self.http.post(&url).json(&body).send().await?;
        let artifact: CreatedArtifact = Self::parse(response).await?;
        info!(
            "Created translation {} for transcript {}",
            artifact.id, transcript_id
        );
        Ok(artifact)
    }
}
