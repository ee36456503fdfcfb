//! Worker configuration.

use std::time::Duration;

use vscribe_models::JobKind;

/// Dispatch worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Which pipeline stage this process serves
    pub kind: JobKind,
    /// Fixed worker pool size
    pub max_workers: usize,
    /// Interval between claim-next polls
    pub poll_interval: Duration,
    /// Sleep when the in-process queue is empty, so stop requests are
    /// observed promptly
    pub idle_poll: Duration,
    /// Bounded wait for in-flight jobs during stop
    pub stop_timeout: Duration,
    /// Skip event subscription and run on polling alone
    pub events_disabled: bool,
    /// Target language for translation jobs
    pub target_language: String,
}

impl WorkerConfig {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            max_workers: 2,
            poll_interval: Duration::from_secs(10),
            idle_poll: Duration::from_millis(250),
            stop_timeout: Duration::from_secs(30),
            events_disabled: false,
            target_language: "en".to_string(),
        }
    }

    /// Create config from environment variables. `JOB_KIND` is required.
    pub fn from_env() -> anyhow::Result<Self> {
        let kind: JobKind = std::env::var("JOB_KIND")
            .map_err(|_| anyhow::anyhow!("JOB_KIND is not set"))?
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid JOB_KIND: {e}"))?;

        let defaults = Self::new(kind);
        Ok(Self {
            max_workers: std::env::var("WORKER_MAX_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_workers),
            poll_interval: Duration::from_secs(
                std::env::var("POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.poll_interval.as_secs()),
            ),
            stop_timeout: Duration::from_secs(
                std::env::var("WORKER_STOP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.stop_timeout.as_secs()),
            ),
            events_disabled: std::env::var("EVENTS_DISABLED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            target_language: std::env::var("TRANSLATION_LANGUAGE")
                .unwrap_or(defaults.target_language),
            ..defaults
        })
    }
}
