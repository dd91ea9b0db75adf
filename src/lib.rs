//! cmdmatch: concurrent fuzzy matching of spoken transcripts against a
//! dictionary of user-defined commands.
//! Library entry point: the `MatchEngine` facade wiring the algorithm
//! catalog, worker pool, dispatcher and decision policy together.

pub mod cancellation;
pub mod catalog;
pub mod config;
pub mod decision;
pub mod dictionary;
pub mod dispatcher;
pub mod metrics;
pub mod scheduler;
pub mod similarity;
pub mod state_machine;
pub mod task;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{info, warn};

pub use catalog::{AlgorithmCatalog, AlgorithmKind, AlgorithmSpec};
pub use config::{ConfigError, EngineConfig};
pub use decision::{Decision, DecisionPolicy};
pub use dictionary::{CommandDictionary, CommandEntry, DictionaryError, Transcript, TranscriptBatch};

use cancellation::TaskGeneration;
use dispatcher::ConcurrentMatchDispatcher;
pub use metrics::MetricsSnapshot;

use metrics::{timers, MetricsRegistry, RequestIds};
use scheduler::WorkerPool;
use state_machine::{PassPhase, TaskBoard};
use task::MatchTask;

#[derive(Debug)]
pub enum MatchError {
    /// Malformed input, rejected before any task is spawned.
    InvalidArgument(String),
    ShutDown,
    /// `submit` was called off-runtime on an engine with no runtime handle.
    NoRuntime,
    WorkerPool(std::io::Error),
    Config(ConfigError),
    Dictionary(DictionaryError),
}

impl std::fmt::Display for MatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            MatchError::ShutDown => write!(f, "match engine is shut down"),
            MatchError::NoRuntime => write!(f, "no tokio runtime available to run the pass"),
            MatchError::WorkerPool(e) => write!(f, "worker pool error: {e}"),
            MatchError::Config(e) => write!(f, "{e}"),
            MatchError::Dictionary(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for MatchError {}

impl From<ConfigError> for MatchError {
    fn from(e: ConfigError) -> Self {
        MatchError::Config(e)
    }
}

impl From<DictionaryError> for MatchError {
    fn from(e: DictionaryError) -> Self {
        MatchError::Dictionary(e)
    }
}

/// Session-scoped matching engine. Construct once, share behind an `Arc`,
/// shut down once.
pub struct MatchEngine {
    config: EngineConfig,
    catalog: AlgorithmCatalog,
    generations: Arc<TaskGeneration>,
    dispatcher: ConcurrentMatchDispatcher,
    metrics: Arc<MetricsRegistry>,
    runtime: Option<Handle>,
    shut_down: AtomicBool,
}

impl MatchEngine {
    pub fn new(config: EngineConfig) -> Result<Self, MatchError> {
        Self::with_catalog(config, AlgorithmCatalog::new())
    }

    /// Engine over a custom catalog. A persisted algorithm override in the
    /// config is restored as-is.
    pub fn with_catalog(config: EngineConfig, catalog: AlgorithmCatalog) -> Result<Self, MatchError> {
        config.validate()?;
        catalog.restore_override(config.algorithms.clone());

        let metrics = Arc::new(MetricsRegistry::new());
        let pool = WorkerPool::new(config.worker_count()).map_err(MatchError::WorkerPool)?;
        let dispatcher = ConcurrentMatchDispatcher::new(
            pool,
            Arc::clone(&metrics),
            config.timeout(),
            config.drain(),
        );
        info!(
            workers = dispatcher.pool_size(),
            timeout_ms = config.timeout_ms,
            locale = config.locale.as_deref().unwrap_or("any"),
            "match engine ready"
        );

        Ok(Self {
            config,
            catalog,
            generations: Arc::new(TaskGeneration::new()),
            dispatcher,
            metrics,
            runtime: Handle::try_current().ok(),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Runtime used by `submit` when called from a thread outside any runtime.
    /// Engines built inside a runtime capture it automatically.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate and freeze a dictionary for sharing across passes.
    pub fn load_dictionary(&self, entries: Vec<CommandEntry>) -> Result<Arc<CommandDictionary>, MatchError> {
        let dictionary = CommandDictionary::new(entries)?;
        info!(entries = dictionary.len(), "dictionary loaded");
        Ok(Arc::new(dictionary))
    }

    pub fn load_dictionary_file(&self, path: &Path) -> Result<Arc<CommandDictionary>, MatchError> {
        let dictionary = CommandDictionary::load_from_file(path)?;
        info!(
            path = %path.display(),
            version = dictionary.version(),
            entries = dictionary.len(),
            "dictionary loaded"
        );
        Ok(Arc::new(dictionary))
    }

    /// Restrict matching to the named algorithms. `None` or an empty list
    /// restores the defaults.
    pub fn configure_algorithms(&self, ids: Option<&[&str]>) -> Result<(), MatchError> {
        self.catalog.set_override(ids)?;
        Ok(())
    }

    pub fn active_algorithms(&self) -> Vec<AlgorithmKind> {
        self.catalog
            .active_algorithms()
            .iter()
            .map(|s| s.kind)
            .collect()
    }

    fn ensure_running(&self) -> Result<(), MatchError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(MatchError::ShutDown);
        }
        Ok(())
    }

    /// One full match pass. Returns within the configured timeout plus a
    /// small drain, even when some algorithms are still running.
    pub async fn match_batch(
        &self,
        batch: &TranscriptBatch,
        dictionary: &Arc<CommandDictionary>,
    ) -> Result<Decision, MatchError> {
        self.ensure_running()?;
        if batch.is_empty() {
            return Err(MatchError::InvalidArgument("transcript batch is empty".into()));
        }
        if dictionary.is_empty() {
            return Err(MatchError::InvalidArgument("dictionary is empty".into()));
        }

        let specs = self.catalog.active_algorithms();
        let policy = DecisionPolicy::new(&specs);

        let guard = self.generations.guard();
        let ids = RequestIds::new(guard.my_generation());
        let board = Arc::new(TaskBoard::new(ids.pass_id.clone()));
        let stopwatch = self.metrics.stopwatch(timers::PASS);
        let _ = board.transition(PassPhase::Dispatched);

        let prepared = Arc::new(batch.prepare(dictionary.languages().iter().map(String::as_str)));
        let tasks: Vec<MatchTask> = specs
            .into_iter()
            .map(|spec| {
                MatchTask::new(
                    spec,
                    Arc::clone(dictionary),
                    Arc::clone(&prepared),
                    self.config.locale.clone(),
                )
            })
            .collect();

        let outcome = match self.dispatcher.dispatch(tasks, guard, Arc::clone(&board)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = board.transition(PassPhase::Idle);
                return Err(e);
            }
        };

        let decision = policy
            .decide(&outcome.results)
            .with_timed_out(outcome.timed_out.iter().copied())
            .with_transcript(batch);
        let _ = board.transition(PassPhase::Decided);
        let elapsed = stopwatch.stop();
        self.metrics.record_pass(decision.is_match());

        info!(
            pass_id = %ids.pass_id,
            generation = ids.generation,
            payload_id = ?decision.payload_id(),
            algorithm = ?decision.kind,
            confidence = decision.confidence,
            timed_out = decision.timed_out.len(),
            failed = decision.failed.len(),
            cancelled = outcome.cancelled,
            elapsed_us = elapsed.as_micros() as u64,
            "pass decided"
        );
        let _ = board.transition(PassPhase::Idle);
        Ok(decision)
    }

    /// Validate raw recognizer output, then match it.
    pub async fn match_transcripts(
        &self,
        transcripts: Vec<Transcript>,
        dictionary: &Arc<CommandDictionary>,
    ) -> Result<Decision, MatchError> {
        let batch = TranscriptBatch::new(transcripts).map_err(MatchError::InvalidArgument)?;
        self.match_batch(&batch, dictionary).await
    }

    /// Non-blocking variant: the pass runs on a Tokio runtime and
    /// `on_complete` receives its outcome. Uses the caller's runtime when
    /// there is one, else the engine's. Shut-down state and a missing runtime
    /// are reported synchronously.
    pub fn submit<F>(
        self: &Arc<Self>,
        batch: TranscriptBatch,
        dictionary: Arc<CommandDictionary>,
        on_complete: F,
    ) -> Result<tokio::task::JoinHandle<()>, MatchError>
    where
        F: FnOnce(Result<Decision, MatchError>) + Send + 'static,
    {
        self.ensure_running()?;
        let runtime = Handle::try_current()
            .ok()
            .or_else(|| self.runtime.clone())
            .ok_or(MatchError::NoRuntime)?;
        let engine = Arc::clone(self);
        Ok(runtime.spawn(async move {
            let result = engine.match_batch(&batch, &dictionary).await;
            on_complete(result);
        }))
    }

    /// Cancel every in-flight pass: a newer utterance superseded them.
    pub fn preempt(&self) -> u64 {
        let generation = self.generations.cancel_and_advance();
        info!(generation, "in-flight passes preempted");
        generation
    }

    /// Stop the worker pool. Later calls to match fail with `ShutDown`.
    /// Blocks for up to two grace periods; async callers use `shutdown_async`.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("match engine shutting down");
        let generations = Arc::clone(&self.generations);
        self.dispatcher
            .shutdown(self.config.shutdown_grace(), move || {
                warn!("workers still busy after grace period, cancelling in-flight tasks");
                generations.cancel_all();
            });
    }

    /// `shutdown` on the blocking pool, so runtime workers stay free while
    /// stalled match workers are waited out.
    pub async fn shutdown_async(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        if let Err(e) = tokio::task::spawn_blocking(move || engine.shutdown()).await {
            warn!(error = %e, "shutdown task did not complete");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn metrics_summary(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
