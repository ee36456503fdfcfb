//! Worker entry point.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vscribe_events::EventBus;
use vscribe_store::JobStore;
use vscribe_worker::{DispatchWorker, EngineHandle, EngineLoader, WorkerConfig};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vscribe=debug"));

    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;
    info!("Starting vscribe-worker for {} jobs", config.kind);

    let store = Arc::new(JobStore::from_env()?);
    let events = Arc::new(EventBus::from_env()?);
    let engine = Arc::new(EngineHandle::new(EngineLoader::with_placeholders()));

    let worker = Arc::new(DispatchWorker::new(config, store, events, engine));

    let signal_worker = Arc::clone(&worker);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_worker.shutdown();
        }
    });

    worker.run().await?;
    info!("Worker shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_logging();

    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }
}
