//! Per-stage dispatch worker.
//!
//! One binary serves any pipeline stage, selected by `JOB_KIND`. Jobs are
//! discovered through the event bus and through store polling, deduplicated,
//! and executed on a bounded in-process pool; inference itself runs strictly
//! serialized behind the engine handle.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod processor;
pub mod queue_manager;

pub use config::WorkerConfig;
pub use dispatch::DispatchWorker;
pub use engine::{
    EngineHandle, EngineLoader, FnStrategy, InferenceEngine, InferenceInput, InferenceOutput,
    ModelStrategy, PlaceholderEngine,
};
pub use error::{WorkerError, WorkerResult};
pub use processor::{process_job, ProcessorContext};
pub use queue_manager::{QueueManager, QueueStatus};
