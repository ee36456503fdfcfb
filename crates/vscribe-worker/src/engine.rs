//! Inference engine handle.
//!
//! The engine is an expensive, stateful resource: it is acquired lazily via
//! an ordered list of model strategies and every invocation is serialized
//! behind one lock, regardless of worker-pool concurrency. Pool concurrency
//! overlaps I/O and bookkeeping across jobs; inference itself does not
//! overlap.

use tokio::sync::Mutex;
use tracing::{info, warn};

use vscribe_models::Segment;

use crate::error::{WorkerError, WorkerResult};

/// Input handed to the engine, one variant per pipeline stage.
#[derive(Debug, Clone)]
pub enum InferenceInput {
    Transcribe {
        filename: String,
    },
    Summarize {
        text: String,
    },
    Translate {
        text: String,
        segments: Vec<Segment>,
        target_language: String,
    },
}

/// Engine output: text plus optional timed segments.
#[derive(Debug, Clone)]
pub struct InferenceOutput {
    pub text: String,
    pub segments: Vec<Segment>,
    pub language: Option<String>,
}

/// A loaded model. `run` is synchronous and expensive; callers go through
/// [`EngineHandle`] which serializes access.
pub trait InferenceEngine: Send {
    fn name(&self) -> &str;
    fn run(&mut self, input: &InferenceInput) -> anyhow::Result<InferenceOutput>;
}

impl std::fmt::Debug for dyn InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("name", &self.name())
            .finish()
    }
}

/// One way of acquiring an engine (a model variant, a remote runtime, ...).
pub trait ModelStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn acquire(&self) -> anyhow::Result<Box<dyn InferenceEngine>>;
}

/// Strategy built from a closure.
pub struct FnStrategy<F> {
    name: String,
    acquire: F,
}

impl<F> FnStrategy<F>
where
    F: Fn() -> anyhow::Result<Box<dyn InferenceEngine>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, acquire: F) -> Self {
        Self {
            name: name.into(),
            acquire,
        }
    }
}

impl<F> ModelStrategy for FnStrategy<F>
where
    F: Fn() -> anyhow::Result<Box<dyn InferenceEngine>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn acquire(&self) -> anyhow::Result<Box<dyn InferenceEngine>> {
        (self.acquire)()
    }
}

/// Ordered acquisition chain: strategies are tried in sequence and the first
/// one to produce an engine wins.
pub struct EngineLoader {
    strategies: Vec<Box<dyn ModelStrategy>>,
}

impl EngineLoader {
    pub fn new(strategies: Vec<Box<dyn ModelStrategy>>) -> Self {
        Self { strategies }
    }

    /// Default chain: the built-in placeholder variants.
    pub fn with_placeholders() -> Self {
        Self::new(vec![
            Box::new(FnStrategy::new("placeholder-standard", || {
                Ok(Box::new(PlaceholderEngine::new("standard")) as Box<dyn InferenceEngine>)
            })),
            Box::new(FnStrategy::new("placeholder-compact", || {
                Ok(Box::new(PlaceholderEngine::new("compact")) as Box<dyn InferenceEngine>)
            })),
        ])
    }

    fn load(&self) -> WorkerResult<Box<dyn InferenceEngine>> {
        let mut tried = Vec::new();
        for strategy in &self.strategies {
            match strategy.acquire() {
                Ok(engine) => {
                    info!("Loaded inference model via {}", strategy.name());
                    return Ok(engine);
                }
                Err(e) => {
                    warn!("Model strategy {} failed: {:#}", strategy.name(), e);
                    tried.push(strategy.name().to_string());
                }
            }
        }
        Err(WorkerError::EngineUnavailable(tried.join(", ")))
    }
}

/// Shared handle over the lazily-loaded engine singleton.
pub struct EngineHandle {
    loader: EngineLoader,
    engine: Mutex<Option<Box<dyn InferenceEngine>>>,
}

impl EngineHandle {
    pub fn new(loader: EngineLoader) -> Self {
        Self {
            loader,
            engine: Mutex::new(None),
        }
    }

    /// Run one inference. The lock is held for the duration of the call and
    /// never across a store call; concurrent callers queue here.
    pub async fn run(&self, input: &InferenceInput) -> WorkerResult<InferenceOutput> {
        let mut guard = self.engine.lock().await;

        if guard.is_none() {
            info!("Loading inference model on first use");
            let loaded = tokio::task::block_in_place(|| self.loader.load())?;
            *guard = Some(loaded);
        }
        let Some(engine) = guard.as_mut() else {
            return Err(WorkerError::EngineUnavailable("engine slot empty".to_string()));
        };

        tokio::task::block_in_place(|| engine.run(input))
            .map_err(|e| WorkerError::InferenceFailed(format!("{e:#}")))
    }
}

/// Stand-in engine producing deterministic output per stage.
///
/// The upstream system's transcription path shipped exactly such a
/// placeholder; real deployments provide a [`ModelStrategy`] wrapping their
/// model runtime.
pub struct PlaceholderEngine {
    variant: String,
}

impl PlaceholderEngine {
    pub fn new(variant: impl Into<String>) -> Self {
        Self {
            variant: variant.into(),
        }
    }
}

impl InferenceEngine for PlaceholderEngine {
    fn name(&self) -> &str {
        &self.variant
    }

    fn run(&mut self, input: &InferenceInput) -> anyhow::Result<InferenceOutput> {
        let output = match input {
            InferenceInput::Transcribe { filename } => InferenceOutput {
                text: format!("Placeholder transcript for {filename}."),
                segments: vec![Segment {
                    id: 1,
                    start_time: 0.0,
                    end_time: 1.0,
                    text: format!("Placeholder transcript for {filename}."),
                }],
                language: Some("en".to_string()),
            },
            InferenceInput::Summarize { text } => {
                let prefix: String = text.chars().take(200).collect();
                InferenceOutput {
                    text: format!("Summary: {prefix}"),
                    segments: Vec::new(),
                    language: None,
                }
            }
            InferenceInput::Translate {
                text,
                segments,
                target_language,
            } => InferenceOutput {
                text: format!("[{target_language}] {text}"),
                segments: segments
                    .iter()
                    .map(|s| Segment {
                        id: s.id,
                        start_time: s.start_time,
                        end_time: s.end_time,
                        text: format!("[{target_language}] {}", s.text),
                    })
                    .collect(),
                language: Some(target_language.clone()),
            },
        };
        Ok(output)
    }
}
