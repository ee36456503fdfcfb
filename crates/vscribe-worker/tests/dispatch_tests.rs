//! End-to-end dispatch tests against a mock job store.
//!
//! The event bus points at an unreachable address throughout, which is
//! exactly the degraded mode the worker must survive: discovery happens via
//! the startup drain and the poll loop, and status events are lost with a
//! warning.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vscribe_events::{EventBus, EventBusConfig};
use vscribe_models::JobKind;
use vscribe_store::{JobStore, StoreConfig};
use vscribe_worker::{DispatchWorker, EngineHandle, EngineLoader, WorkerConfig};

/// Matches a complete call whose reported duration is below a bound.
struct ProcessingTimeBelow(f64);

impl wiremock::Match for ProcessingTimeBelow {
    fn matches(&self, request: &wiremock::Request) -> bool {
        serde_json::from_slice::<serde_json::Value>(&request.body)
            .ok()
            .and_then(|body| body["processing_time_seconds"].as_f64())
            .is_some_and(|t| t < self.0)
    }
}

fn job_body(id: &str, video_id: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "kind": "transcription",
        "subject_id": video_id,
        "status": status,
        "created_at": "2025-01-01T00:00:00Z",
    })
}

/// Event bus that fails fast: one connection attempt, no delay.
fn unreachable_bus() -> EventBus {
    EventBus::new(EventBusConfig {
        redis_url: "redis://127.0.0.1:1".to_string(),
        max_attempts: 1,
        retry_delay: Duration::ZERO,
        ..EventBusConfig::default()
    })
    .expect("bus construction")
}

fn worker_for(server: &MockServer, config: WorkerConfig) -> Arc<DispatchWorker> {
    let store = Arc::new(
        JobStore::new(StoreConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
        })
        .expect("store construction"),
    );
    let events = Arc::new(unreachable_bus());
    let engine = Arc::new(EngineHandle::new(EngineLoader::with_placeholders()));
    Arc::new(DispatchWorker::new(config, store, events, engine))
}

async fn mount_video(server: &MockServer, video_id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/videos/{video_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": video_id,
            "filename": format!("{video_id}.mp4"),
        })))
        .mount(server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("/videos/{video_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

async fn mount_lifecycle(server: &MockServer, job_id: &str, video_id: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/transcription-jobs/{job_id}/start")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(job_body(job_id, video_id, "processing")),
        )
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/transcription-jobs/{job_id}/complete")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(job_body(job_id, video_id, "completed")),
        )
        .expect(1)
        .mount(server)
        .await;
}

async fn run_until_settled(worker: Arc<DispatchWorker>, settle: Duration) {
    let runner = Arc::clone(&worker);
    let task = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(settle).await;
    worker.shutdown();
    task.await
        .expect("worker task join")
        .expect("worker run result");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn startup_drain_completes_pending_jobs() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/transcription-jobs"))
        .and(query_param("status", "pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            job_body("J1", "v1", "pending"),
            job_body("J2", "v2", "pending"),
        ])))
        .mount(&server)
        .await;
    // The poll interval is long; nothing should come from /next here
    Mock::given(method("GET"))
        .and(path("/transcription-jobs/next"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/transcripts/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "T1"})))
        .mount(&server)
        .await;

    mount_video(&server, "v1").await;
    mount_video(&server, "v2").await;
    mount_lifecycle(&server, "J1", "v1").await;
    mount_lifecycle(&server, "J2", "v2").await;

    let mut config = WorkerConfig::new(JobKind::Transcription);
    config.max_workers = 2;
    config.poll_interval = Duration::from_secs(30);
    config.idle_poll = Duration::from_millis(20);
    config.events_disabled = true;

    let worker = worker_for(&server, config);
    run_until_settled(worker, Duration::from_millis(800)).await;

    // expect(1) on each start/complete mock is verified on drop
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_event_bus_degrades_to_polling() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/transcription-jobs"))
        .and(query_param("status", "pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    // Poll path: one job per claim until the queue is drained
    Mock::given(method("GET"))
        .and(path("/transcription-jobs/next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_body("J1", "v1", "pending")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transcription-jobs/next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_body("J2", "v2", "pending")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transcription-jobs/next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_body("J3", "v3", "pending")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transcription-jobs/next"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/transcripts/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "T1"})))
        .mount(&server)
        .await;

    mount_video(&server, "v1").await;
    mount_video(&server, "v2").await;
    mount_video(&server, "v3").await;
    mount_lifecycle(&server, "J1", "v1").await;
    mount_lifecycle(&server, "J2", "v2").await;
    mount_lifecycle(&server, "J3", "v3").await;

    let mut config = WorkerConfig::new(JobKind::Transcription);
    config.max_workers = 2;
    config.poll_interval = Duration::from_millis(50);
    config.idle_poll = Duration::from_millis(20);
    // Events stay enabled: subscription fails and the worker carries on
    config.events_disabled = false;

    let worker = worker_for(&server, config);
    run_until_settled(worker, Duration::from_millis(1500)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn processing_time_excludes_claim_latency() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/transcription-jobs"))
        .and(query_param("status", "pending"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([job_body("J1", "v1", "pending")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transcription-jobs/next"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/transcripts/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "T1"})))
        .mount(&server)
        .await;
    mount_video(&server, "v1").await;

    // The claim is slow; the stage itself is fast. The reported duration
    // must reflect only the stage.
    Mock::given(method("POST"))
        .and(path("/transcription-jobs/J1/start"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(job_body("J1", "v1", "processing"))
                .set_delay(Duration::from_millis(400)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/transcription-jobs/J1/complete"))
        .and(ProcessingTimeBelow(0.25))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(job_body("J1", "v1", "completed")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut config = WorkerConfig::new(JobKind::Transcription);
    config.max_workers = 1;
    config.poll_interval = Duration::from_secs(30);
    config.idle_poll = Duration::from_millis(20);
    config.events_disabled = true;

    let worker = worker_for(&server, config);
    run_until_settled(worker, Duration::from_millis(1500)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stage_failure_settles_job_and_subject() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/transcription-jobs"))
        .and(query_param("status", "pending"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([job_body("J1", "v1", "pending")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transcription-jobs/next"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/transcription-jobs/J1/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_body("J1", "v1", "processing")))
        .expect(1)
        .mount(&server)
        .await;

    // The video fetch fails, so the stage fails
    Mock::given(method("GET"))
        .and(path("/videos/v1"))
        .respond_with(ResponseTemplate::new(500).set_body_string("storage offline"))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/transcription-jobs/J1/fail"))
        .and(body_partial_json(json!({"error_details": {}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_body("J1", "v1", "failed")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/videos/v1"))
        .and(body_partial_json(json!({"status": "error"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    // Nothing gets completed and no artifact is created
    Mock::given(method("POST"))
        .and(path("/transcription-jobs/J1/complete"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/transcripts/"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = WorkerConfig::new(JobKind::Transcription);
    config.max_workers = 1;
    config.poll_interval = Duration::from_secs(30);
    config.idle_poll = Duration::from_millis(20);
    config.events_disabled = true;

    let worker = worker_for(&server, config);
    run_until_settled(worker, Duration::from_millis(800)).await;
}
