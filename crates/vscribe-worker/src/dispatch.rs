//! Dispatch worker: event and poll ingestion converging on one queue.
//!
//! The event path is a latency optimization; polling alone is sufficient for
//! correctness. When the event bus is unreachable at startup the worker logs
//! it and runs on polling, and duplicate discovery across the two paths is
//! absorbed by the queue manager's ID deduplication.

use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vscribe_events::{EventBus, EventBusResult};
use vscribe_models::{JobKind, JobStatus, JobStatusChanged, TOPIC_JOB_STATUS_CHANGED};
use vscribe_store::JobStore;

use crate::config::WorkerConfig;
use crate::engine::EngineHandle;
use crate::error::WorkerResult;
use crate::processor::{process_job, ProcessorContext};
use crate::queue_manager::{QueueManager, QueueStatus};

/// One pipeline stage's worker process.
pub struct DispatchWorker {
    config: WorkerConfig,
    store: Arc<JobStore>,
    events: Arc<EventBus>,
    engine: Arc<EngineHandle>,
    queue: Arc<QueueManager>,
    shutdown: watch::Sender<bool>,
}

impl DispatchWorker {
    pub fn new(
        config: WorkerConfig,
        store: Arc<JobStore>,
        events: Arc<EventBus>,
        engine: Arc<EngineHandle>,
    ) -> Self {
        let queue = Arc::new(QueueManager::new(
            config.max_workers,
            config.idle_poll,
            config.stop_timeout,
        ));
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            store,
            events,
            engine,
            queue,
            shutdown,
        }
    }

    /// Run until `shutdown` is called: start the pool, bind event queues,
    /// drain already-pending jobs, then poll.
    pub async fn run(&self) -> WorkerResult<()> {
        let kind = self.config.kind;
        info!(
            "Starting {} dispatch worker with {} workers",
            kind, self.config.max_workers
        );

        let ctx = Arc::new(ProcessorContext {
            kind,
            store: Arc::clone(&self.store),
            events: Arc::clone(&self.events),
            engine: Arc::clone(&self.engine),
            target_language: self.config.target_language.clone(),
        });
        let processor_ctx = Arc::clone(&ctx);
        self.queue
            .start(move |job| process_job(Arc::clone(&processor_ctx), job))
            .await;

        let consumer = self.start_event_path().await;

        // Jobs created while no worker was running
        match self.store.list_pending(kind).await {
            Ok(jobs) => {
                if !jobs.is_empty() {
                    info!("Found {} pending {} jobs at startup", jobs.len(), kind);
                }
                for job in jobs {
                    self.queue.add_job(job).await;
                }
            }
            Err(e) => warn!("Could not list pending {} jobs: {}", kind, e),
        }

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.store.claim_next(kind).await {
                        Ok(Some(job)) => {
                            self.queue.add_job(job).await;
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Poll for next {} job failed: {}", kind, e),
                    }
                    let status = self.queue.get_queue_status().await;
                    debug!(status = ?status, "poll cycle");
                }
            }
        }

        info!("Shutting down {} dispatch worker", kind);
        self.events.stop_consuming();
        if let Some(handle) = consumer {
            let _ = handle.await;
        }
        self.queue.stop().await;
        self.events.close().await;
        Ok(())
    }

    /// Request a cooperative shutdown of `run`.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Snapshot of the in-process queue for health observation.
    pub async fn queue_status(&self) -> QueueStatus {
        self.queue.get_queue_status().await
    }

    /// Bind the event queues and spawn the consume loop. Any failure here
    /// degrades to polling rather than aborting the worker.
    async fn start_event_path(&self) -> Option<JoinHandle<()>> {
        if self.config.events_disabled {
            info!("Event ingestion disabled, running on polling alone");
            return None;
        }

        match self.subscribe_events().await {
            Ok(()) => {
                let bus = Arc::clone(&self.events);
                Some(tokio::spawn(async move {
                    if let Err(e) = bus.start_consuming().await {
                        error!("Event consumer stopped: {}", e);
                    }
                }))
            }
            Err(e) => {
                warn!("Event bus unavailable, degrading to polling: {}", e);
                None
            }
        }
    }

    async fn subscribe_events(&self) -> EventBusResult<()> {
        self.events.connect().await?;
        let kind = self.config.kind;

        // Upstream artifact creation for this stage
        {
            let store = Arc::clone(&self.store);
            let queue = Arc::clone(&self.queue);
            self.events
                .subscribe(
                    kind.creation_topic(),
                    move |payload| {
                        let store = Arc::clone(&store);
                        let queue = Arc::clone(&queue);
                        async move { handle_creation_event(kind, &store, &queue, payload).await }
                            .boxed()
                    },
                    Some(&format!("{kind}_created_queue")),
                )
                .await?;
        }

        // Retries surface as a pending status change
        {
            let store = Arc::clone(&self.store);
            let queue = Arc::clone(&self.queue);
            self.events
                .subscribe(
                    TOPIC_JOB_STATUS_CHANGED,
                    move |payload| {
                        let store = Arc::clone(&store);
                        let queue = Arc::clone(&queue);
                        async move { handle_status_event(kind, &store, &queue, payload).await }
                            .boxed()
                    },
                    Some(&format!("{kind}_job_status_queue")),
                )
                .await?;
        }

        Ok(())
    }
}

/// An upstream artifact was created: the store has already created the
/// matching job, so claim and enqueue it. Errors here leave the message
/// pending for redelivery.
async fn handle_creation_event(
    kind: JobKind,
    store: &JobStore,
    queue: &QueueManager,
    payload: Value,
) -> anyhow::Result<()> {
    let field = kind.subject_field();
    let subject_id = payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("{} event missing {field}", kind.creation_topic()))?;
    info!("Received {} event for {}", kind.creation_topic(), subject_id);

    match store.claim_next(kind).await? {
        Some(job) => {
            if job.subject_id != subject_id {
                // Another pending job was older; it is still ours to run
                debug!(
                    "Claimed {} job {} for {} instead of {}",
                    kind, job.id, job.subject_id, subject_id
                );
            }
            queue.add_job(job).await;
        }
        None => warn!("No pending {} job found for {}", kind, subject_id),
    }
    Ok(())
}

/// A job of our kind went back to pending (a retry): fetch and enqueue it.
/// Events for other kinds or statuses are acknowledged without action.
async fn handle_status_event(
    kind: JobKind,
    store: &JobStore,
    queue: &QueueManager,
    payload: Value,
) -> anyhow::Result<()> {
    let event: JobStatusChanged = serde_json::from_value(payload)?;
    if event.job_type != kind || event.status != JobStatus::Pending {
        return Ok(());
    }

    info!("Job {} returned to pending, enqueueing", event.job_id);
    let job = store.get_job(kind, &event.job_id).await?;
    queue.add_job(job).await;
    Ok(())
}
