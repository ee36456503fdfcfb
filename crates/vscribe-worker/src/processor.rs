//! Per-job processing: the claim -> started -> inference -> settled cycle.
//!
//! Stage-specific behavior (which subject to fetch, which artifact to create,
//! which events to publish) is resolved from the job kind; the lifecycle
//! around it is identical for every stage.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use vscribe_events::EventBus;
use vscribe_models::{ErrorDetails, Job, JobKind, JobStatus};
use vscribe_store::JobStore;

use crate::engine::{EngineHandle, InferenceInput};
use crate::error::{WorkerError, WorkerResult};

/// Shared dependencies for job processing.
pub struct ProcessorContext {
    pub kind: JobKind,
    pub store: Arc<JobStore>,
    pub events: Arc<EventBus>,
    pub engine: Arc<EngineHandle>,
    pub target_language: String,
}

/// What a successful stage produced, for follow-up event publication.
enum StageArtifact {
    Transcript {
        transcript_id: String,
        video_id: String,
    },
    Summary {
        summary_id: String,
        transcript_id: String,
    },
    Terminal,
}

/// Run one job end to end.
///
/// The started-status flip in the store is the authoritative claim: if it
/// fails the job is left untouched for a later poll. After a successful
/// claim every outcome is settled in the store, completed or failed.
pub async fn process_job(ctx: Arc<ProcessorContext>, job: Job) -> WorkerResult<()> {
    let job = match ctx.store.mark_started(&job).await {
        Ok(job) => job,
        Err(e) => {
            error!("Could not claim job {}: {}", job.id, e);
            return Err(e.into());
        }
    };
    // Processing time spans the stage itself, not the claim round-trip
    let started = Instant::now();
    publish_status(&ctx, &job, JobStatus::Processing).await;
    info!("Started {} job {} for {}", ctx.kind, job.id, job.subject_id);

    match run_stage(&ctx, &job).await {
        Ok(artifact) => {
            let processing_time = started.elapsed().as_secs_f64();
            if let Err(e) = ctx.store.mark_completed(&job, processing_time).await {
                // The artifact exists; a later poll reconciles the job row.
                error!("Could not mark job {} completed: {}", job.id, e);
                return Err(e.into());
            }
            publish_status(&ctx, &job, JobStatus::Completed).await;
            publish_artifact(&ctx, artifact).await;
            info!(
                "{} job {} completed in {:.2}s",
                ctx.kind, job.id, processing_time
            );
            Ok(())
        }
        Err(e) => {
            error!("{} job {} failed: {}", ctx.kind, job.id, e);
            let details = ErrorDetails::new(e.to_string())
                .with_traceback(format!("{e:?}"))
                .truncated();
            if let Err(mark_err) = ctx.store.mark_failed(&job, &details).await {
                error!("Could not mark job {} failed: {}", job.id, mark_err);
            }
            if let Err(status_err) = ctx
                .store
                .update_subject_status(
                    ctx.kind,
                    &job.subject_id,
                    ctx.kind.subject_status_on_failure(),
                )
                .await
            {
                warn!(
                    "Could not update {} {} status: {}",
                    ctx.kind.subject_path(),
                    job.subject_id,
                    status_err
                );
            }
            publish_status(&ctx, &job, JobStatus::Failed).await;
            Err(WorkerError::job_failed(format!(
                "{} job {}: {e}",
                ctx.kind, job.id
            )))
        }
    }
}

async fn run_stage(ctx: &ProcessorContext, job: &Job) -> WorkerResult<StageArtifact> {
    let artifact = match ctx.kind {
        JobKind::Transcription => {
            let video = ctx.store.get_video(&job.subject_id).await?;
            let output = ctx
                .engine
                .run(&InferenceInput::Transcribe {
                    filename: video.filename.clone(),
                })
                .await?;
            let created = ctx
                .store
                .create_transcript(&video.id, &output.text, &output.segments)
                .await?;
            StageArtifact::Transcript {
                transcript_id: created.id,
                video_id: video.id,
            }
        }
        JobKind::Summarization => {
            let transcript = ctx.store.get_transcript(&job.subject_id).await?;
            let output = ctx
                .engine
                .run(&InferenceInput::Summarize {
                    text: transcript.content.clone(),
                })
                .await?;
            let created = ctx.store.create_summary(&transcript.id, &output.text).await?;
            StageArtifact::Summary {
                summary_id: created.id,
                transcript_id: transcript.id,
            }
        }
        JobKind::Translation => {
            let transcript = ctx.store.get_transcript(&job.subject_id).await?;
            let output = ctx
                .engine
                .run(&InferenceInput::Translate {
                    text: transcript.content.clone(),
                    segments: transcript.segments.clone(),
                    target_language: ctx.target_language.clone(),
                })
                .await?;
            let language = output.language.as_deref().unwrap_or(&ctx.target_language);
            ctx.store
                .create_translation(&transcript.id, language, &output.text, &output.segments)
                .await?;
            StageArtifact::Terminal
        }
    };

    ctx.store
        .update_subject_status(
            ctx.kind,
            &job.subject_id,
            ctx.kind.subject_status_on_success(),
        )
        .await?;

    Ok(artifact)
}

/// Job status events are observability, not control flow: failures degrade
/// the downstream stages to polling and are logged at warn.
async fn publish_status(ctx: &ProcessorContext, job: &Job, status: JobStatus) {
    if let Err(e) = ctx
        .events
        .publish_job_status_changed(ctx.kind, &job.id, status)
        .await
    {
        warn!(
            "Could not publish {} status for job {}: {}",
            status.as_str(),
            job.id,
            e
        );
    }
}

async fn publish_artifact(ctx: &ProcessorContext, artifact: StageArtifact) {
    let result = match &artifact {
        StageArtifact::Transcript {
            transcript_id,
            video_id,
        } => {
            ctx.events
                .publish_transcription_created(transcript_id, video_id)
                .await
        }
        StageArtifact::Summary {
            summary_id,
            transcript_id,
        } => {
            ctx.events
                .publish_summary_created(summary_id, transcript_id)
                .await
        }
        StageArtifact::Terminal => return,
    };

    if let Err(e) = result {
        warn!("Could not publish artifact event: {}", e);
    }
}
