//! In-process bounded worker pool with job-ID deduplication.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use vscribe_models::{Job, JobId};

use crate::error::WorkerResult;

/// Processor invoked for each dequeued job. Performs the full
/// claim -> started -> inference -> completed/failed cycle.
pub type JobProcessor = Arc<dyn Fn(Job) -> BoxFuture<'static, WorkerResult<()>> + Send + Sync>;

/// Snapshot of queue state for health observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub queue_size: usize,
    pub active_jobs: usize,
    pub max_workers: usize,
    pub running: bool,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Job>,
    /// IDs that are queued or currently executing. Membership here is the
    /// at-most-one-concurrent-execution-per-ID guarantee within a process.
    active: HashSet<JobId>,
}

/// Bounded concurrent executor for job descriptors.
///
/// FIFO within the process; deduplication by job ID is the only cross-path
/// invariant (event and poll ingestion may both deliver the same job).
pub struct QueueManager {
    state: Arc<Mutex<QueueState>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    max_workers: usize,
    idle_poll: Duration,
    stop_timeout: Duration,
}

impl QueueManager {
    /// Create a stopped queue manager.
    pub fn new(max_workers: usize, idle_poll: Duration, stop_timeout: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        info!("Initialized queue manager with {} workers", max_workers);
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            shutdown,
            max_workers,
            idle_poll,
            stop_timeout,
        }
    }

    /// Enqueue a job. Rejected (logged, no-op) if the ID is already queued
    /// or being processed. Returns whether the job was accepted.
    pub async fn add_job(&self, job: Job) -> bool {
        let mut state = self.state.lock().await;
        if state.active.contains(&job.id) {
            warn!("Job {} is already queued or being processed", job.id);
            return false;
        }
        state.active.insert(job.id.clone());
        state.queue.push_back(job);
        info!("Added job to queue, queue size: {}", state.queue.len());
        true
    }

    /// Spawn the fixed worker pool, each task pulling from the queue.
    pub async fn start<F, Fut>(&self, processor: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkerResult<()>> + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Queue manager is already running");
            return;
        }
        self.shutdown.send_replace(false);

        let processor: JobProcessor = Arc::new(move |job| processor(job).boxed());
        let mut workers = self.workers.lock().await;
        for index in 0..self.max_workers {
            workers.push(tokio::spawn(worker_loop(
                index,
                Arc::clone(&self.state),
                Arc::clone(&processor),
                self.shutdown.subscribe(),
                self.idle_poll,
            )));
        }
        info!("Queue manager started");
    }

    /// Stop accepting work and join the pool with a bounded timeout.
    /// In-flight jobs are allowed to finish, not interrupted.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Queue manager is not running");
            return;
        }
        let _ = self.shutdown.send(true);

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            if tokio::time::timeout(self.stop_timeout, handle).await.is_err() {
                warn!("Worker did not stop within {:?}", self.stop_timeout);
            }
        }
        info!("Queue manager stopped");
    }

    /// Snapshot queue state for health/liveness observation.
    pub async fn get_queue_status(&self) -> QueueStatus {
        let state = self.state.lock().await;
        QueueStatus {
            queue_size: state.queue.len(),
            active_jobs: state.active.len(),
            max_workers: self.max_workers,
            running: self.running.load(Ordering::SeqCst),
        }
    }
}

async fn worker_loop(
    index: usize,
    state: Arc<Mutex<QueueState>>,
    processor: JobProcessor,
    mut shutdown_rx: watch::Receiver<bool>,
    idle_poll: Duration,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let job = state.lock().await.queue.pop_front();
        let Some(job) = job else {
            // Short poll so a stop request is observed promptly
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = tokio::time::sleep(idle_poll) => {}
            }
            continue;
        };

        let job_id = job.id.clone();
        info!("Worker {} processing job {}", index, job_id);

        match AssertUnwindSafe(processor(job)).catch_unwind().await {
            Ok(Ok(())) => info!("Job {} processed successfully", job_id),
            // The processor already marked the job failed in the store
            Ok(Err(e)) => error!("Job {} processing failed: {}", job_id, e),
            Err(_) => error!("Job {} processor panicked", job_id),
        }

        // Removal is unconditional, whatever the outcome, so the ID can be
        // delivered again later.
        state.lock().await.active.remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use vscribe_models::JobKind;

    fn manager(max_workers: usize) -> QueueManager {
        QueueManager::new(
            max_workers,
            Duration::from_millis(10),
            Duration::from_secs(2),
        )
    }

    fn test_job() -> Job {
        Job::new(JobKind::Transcription, "video-1")
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let qm = manager(1);
        let job = test_job();

        assert!(qm.add_job(job.clone()).await);
        assert!(!qm.add_job(job).await);

        let status = qm.get_queue_status().await;
        assert_eq!(status.queue_size, 1);
        assert_eq!(status.active_jobs, 1);
        assert!(!status.running);
    }

    #[tokio::test]
    async fn double_delivery_executes_once() {
        let qm = manager(4);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        qm.start(move |_job| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            }
        })
        .await;

        let job = test_job();
        // Event path and poll path both discover the same pending job
        qm.add_job(job.clone()).await;
        qm.add_job(job).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        qm.stop().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn active_id_is_removed_after_failure() {
        let qm = manager(1);
        qm.start(|_job| async { Err(crate::error::WorkerError::job_failed("boom")) })
            .await;

        let job = test_job();
        qm.add_job(job.clone()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = qm.get_queue_status().await;
        assert_eq!(status.active_jobs, 0);
        // The same ID can be delivered again once the attempt is over
        assert!(qm.add_job(job).await);

        qm.stop().await;
    }

    #[tokio::test]
    async fn worker_survives_processor_panic() {
        let qm = manager(1);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        qm.start(move |job: Job| {
            let counter = Arc::clone(&counter);
            async move {
                if job.subject_id == "poison" {
                    panic!("handler exploded");
                }
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        qm.add_job(Job::new(JobKind::Transcription, "poison")).await;
        qm.add_job(Job::new(JobKind::Transcription, "fine")).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        // The pool thread returned to its loop and processed the next job
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(qm.get_queue_status().await.active_jobs, 0);

        qm.stop().await;
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_job() {
        let qm = manager(2);
        let finished = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&finished);
        qm.start(move |_job| {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        qm.add_job(test_job()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        qm.stop().await;

        assert!(finished.load(Ordering::SeqCst));
        assert!(!qm.get_queue_status().await.running);
    }

    #[tokio::test]
    async fn fifo_within_single_worker() {
        let qm = manager(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&order);
        qm.start(move |job: Job| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().await.push(job.subject_id.clone());
                Ok(())
            }
        })
        .await;

        for subject in ["a", "b", "c"] {
            qm.add_job(Job::new(JobKind::Summarization, subject)).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        qm.stop().await;

        assert_eq!(*order.lock().await, vec!["a", "b", "c"]);
    }
}
