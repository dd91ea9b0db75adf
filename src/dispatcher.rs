//! Fans one match pass out to the worker pool and collects whatever finishes
//! before the deadline.
//!
//! Each task publishes through an unbounded tokio channel. The collector
//! waits on that channel with a single wall-clock deadline and also watches
//! the pass token, so a preempted pass stops waiting immediately. On either
//! interrupt it expires every unfinished task on the `TaskBoard`, cancels the
//! pass, and drains for at most `drain` the results that had already reached
//! a publishable phase. Anything finishing later is refused by the board and
//! never reaches the decision.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cancellation::GenerationGuard;
use crate::catalog::AlgorithmKind;
use crate::metrics::{timers, MetricsRegistry};
use crate::scheduler::{panic_message, WorkerPool};
use crate::state_machine::{TaskBoard, TaskPhase};
use crate::task::{MatchResult, MatchTask, TaskStatus};
use crate::MatchError;

/// What a pass produced within its budget.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Completed and failed results, in declaration order.
    pub results: Vec<MatchResult>,
    pub timed_out: Vec<AlgorithmKind>,
    /// The pass was preempted before every task finished.
    pub cancelled: bool,
    pub elapsed: Duration,
}

enum Interrupt {
    Deadline,
    Preempted,
}

pub struct ConcurrentMatchDispatcher {
    pool: WorkerPool,
    metrics: Arc<MetricsRegistry>,
    timeout: Duration,
    drain: Duration,
}

impl ConcurrentMatchDispatcher {
    pub fn new(
        pool: WorkerPool,
        metrics: Arc<MetricsRegistry>,
        timeout: Duration,
        drain: Duration,
    ) -> Self {
        Self {
            pool,
            metrics,
            timeout,
            drain,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Run `tasks` under `guard`. Returns within `timeout + drain` regardless
    /// of how long individual tasks take.
    pub async fn dispatch(
        &self,
        tasks: Vec<MatchTask>,
        guard: GenerationGuard,
        board: Arc<TaskBoard>,
    ) -> Result<DispatchOutcome, MatchError> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.timeout;
        let expected = tasks.len();
        let (tx, mut rx) = mpsc::unbounded_channel::<MatchResult>();

        for task in &tasks {
            board.enqueue(task.kind());
        }
        debug!(pass_id = %board.pass_id(), tasks = expected, "dispatching pass");

        for task in tasks {
            let job_guard = guard.clone();
            let job_board = Arc::clone(&board);
            let job_metrics = Arc::clone(&self.metrics);
            let job_tx = tx.clone();
            let enqueued_at = Instant::now();
            let submitted = self.pool.submit(Box::new(move || {
                run_job(task, job_guard, job_board, job_metrics, job_tx, enqueued_at)
            }));
            if !submitted {
                for kind in board.expire_unfinished(TaskPhase::Cancelled) {
                    self.metrics.record_outcome(kind, TaskPhase::Cancelled);
                }
                guard.cancel();
                return Err(MatchError::ShutDown);
            }
        }
        // only the jobs hold senders now; the channel closes when the last finishes
        drop(tx);

        let mut results: Vec<MatchResult> = Vec::with_capacity(expected);
        let mut interrupt = None;
        while results.len() < expected {
            tokio::select! {
                biased;
                _ = guard.token().cancelled() => {
                    interrupt = Some(Interrupt::Preempted);
                    break;
                }
                received = tokio::time::timeout_at(deadline, rx.recv()) => match received {
                    Ok(Some(result)) => results.push(result),
                    Ok(None) => break,
                    Err(_) => {
                        interrupt = Some(Interrupt::Deadline);
                        break;
                    }
                },
            }
        }

        let cancelled = matches!(interrupt, Some(Interrupt::Preempted));
        if let Some(interrupt) = interrupt {
            let phase = match interrupt {
                Interrupt::Deadline => TaskPhase::TimedOut,
                Interrupt::Preempted => TaskPhase::Cancelled,
            };
            let expired = board.expire_unfinished(phase);
            guard.cancel();
            for &kind in &expired {
                self.metrics.record_outcome(kind, phase);
            }

            if phase == TaskPhase::TimedOut {
                for kind in &expired {
                    warn!(
                        pass_id = %board.pass_id(),
                        algorithm = %kind,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "task missed the pass deadline"
                    );
                }
            } else {
                info!(pass_id = %board.pass_id(), expired = expired.len(), "pass preempted");
            }

            self.drain_published(&mut rx, &mut results, &board).await;
        }

        results.sort_by_key(|r| r.kind.priority());
        Ok(DispatchOutcome {
            results,
            timed_out: board.kinds_in(TaskPhase::TimedOut),
            cancelled,
            elapsed: started.elapsed(),
        })
    }

    /// Pick up results that reached a publishable phase before the interrupt
    /// but were still in flight on the channel.
    async fn drain_published(
        &self,
        rx: &mut mpsc::UnboundedReceiver<MatchResult>,
        results: &mut Vec<MatchResult>,
        board: &TaskBoard,
    ) {
        let stopwatch = self.metrics.stopwatch(timers::DRAIN);
        let drain_deadline = tokio::time::Instant::now() + self.drain;
        while results.len() < board.published_count() {
            match tokio::time::timeout_at(drain_deadline, rx.recv()).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) | Err(_) => break,
            }
        }
        let drained = stopwatch.stop();
        debug!(
            pass_id = %board.pass_id(),
            drained_us = drained.as_micros() as u64,
            results = results.len(),
            "drain finished"
        );
    }

    /// Stop the pool: graceful first, then `on_stall` (cancel in-flight work)
    /// and a second grace period.
    pub fn shutdown(&self, grace: Duration, on_stall: impl FnOnce()) {
        self.pool.shutdown(grace, on_stall);
    }
}

/// Body of one pool job. Only the first terminal transition on the board
/// counts, so a result that loses the race with the deadline is dropped here.
fn run_job(
    task: MatchTask,
    guard: GenerationGuard,
    board: Arc<TaskBoard>,
    metrics: Arc<MetricsRegistry>,
    tx: mpsc::UnboundedSender<MatchResult>,
    enqueued_at: Instant,
) {
    metrics.observe(timers::QUEUE_WAIT, enqueued_at.elapsed());
    let kind = task.kind();

    if !guard.should_continue() {
        let phase = interrupted_phase(&guard);
        if board.advance(kind, phase) {
            metrics.record_outcome(kind, phase);
        }
        return;
    }
    if !board.advance(kind, TaskPhase::Running) {
        return;
    }

    let started = Instant::now();
    let result = match panic::catch_unwind(AssertUnwindSafe(|| task.run(&guard))) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(pass_id = %board.pass_id(), algorithm = %kind, panic = %message, "match task panicked");
            MatchResult::failed(kind, started.elapsed(), format!("task panicked: {message}"))
        }
    };

    let phase = match result.status {
        TaskStatus::Completed => TaskPhase::Completed,
        TaskStatus::Failed => TaskPhase::Failed,
        TaskStatus::TimedOut => interrupted_phase(&guard),
    };
    if !board.advance(kind, phase) {
        debug!(pass_id = %board.pass_id(), algorithm = %kind, "late result discarded");
        return;
    }

    metrics.observe(kind.metric_name(), result.elapsed);
    metrics.record_outcome(kind, phase);
    if matches!(phase, TaskPhase::Completed | TaskPhase::Failed) {
        let _ = tx.send(result);
    }
}

/// A stale generation means the pass was preempted, otherwise its own
/// deadline cancelled it.
fn interrupted_phase(guard: &GenerationGuard) -> TaskPhase {
    if guard.is_current() {
        TaskPhase::TimedOut
    } else {
        TaskPhase::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::TaskGeneration;
    use crate::catalog::{AlgorithmSpec, EXACT_CONFIDENCE};
    use crate::dictionary::{CommandDictionary, CommandEntry, Transcript, TranscriptBatch};
    use crate::similarity::{MetricError, RawScore, SimilarityMetric};

    struct Sleepy(Duration);

    impl SimilarityMetric for Sleepy {
        fn score(&self, _candidate: &str, _key_phrase: &str) -> Result<RawScore, MetricError> {
            std::thread::sleep(self.0);
            Ok(RawScore::similarity(1.0))
        }
    }

    struct Panicky;

    impl SimilarityMetric for Panicky {
        fn score(&self, _candidate: &str, _key_phrase: &str) -> Result<RawScore, MetricError> {
            panic!("metric exploded")
        }
    }

    fn dispatcher(timeout_ms: u64) -> ConcurrentMatchDispatcher {
        ConcurrentMatchDispatcher::new(
            WorkerPool::new(4).unwrap(),
            Arc::new(MetricsRegistry::new()),
            Duration::from_millis(timeout_ms),
            Duration::from_millis(5),
        )
    }

    fn tasks(specs: Vec<AlgorithmSpec>) -> Vec<MatchTask> {
        let dictionary = Arc::new(
            CommandDictionary::new(vec![CommandEntry::new("turn off wifi", "en", 1)]).unwrap(),
        );
        let batch = TranscriptBatch::new(vec![Transcript::new("please turn off wifi", 0.9)]).unwrap();
        let prepared = Arc::new(batch.prepare(dictionary.languages().iter().map(String::as_str)));
        specs
            .into_iter()
            .map(|spec| MatchTask::new(spec, Arc::clone(&dictionary), Arc::clone(&prepared), None))
            .collect()
    }

    #[tokio::test]
    async fn test_all_tasks_complete() {
        let dispatcher = dispatcher(500);
        let generations = TaskGeneration::new();
        let board = Arc::new(TaskBoard::new("pass-a"));
        let outcome = dispatcher
            .dispatch(
                tasks(vec![
                    AlgorithmSpec::for_kind(AlgorithmKind::Levenshtein),
                    AlgorithmSpec::for_kind(AlgorithmKind::ExactSuffix),
                ]),
                generations.guard(),
                Arc::clone(&board),
            )
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].kind, AlgorithmKind::ExactSuffix);
        assert_eq!(outcome.results[0].confidence, EXACT_CONFIDENCE);
        assert!(outcome.timed_out.is_empty());
        assert!(!outcome.cancelled);
        assert_eq!(board.published_count(), 2);
    }

    #[tokio::test]
    async fn test_slow_task_times_out() {
        let dispatcher = dispatcher(50);
        let generations = TaskGeneration::new();
        let board = Arc::new(TaskBoard::new("pass-b"));
        let slow = AlgorithmSpec::for_kind(AlgorithmKind::JaroWinkler)
            .with_metric(Arc::new(Sleepy(Duration::from_millis(300))));

        let started = Instant::now();
        let outcome = dispatcher
            .dispatch(
                tasks(vec![AlgorithmSpec::for_kind(AlgorithmKind::ExactSuffix), slow]),
                generations.guard(),
                Arc::clone(&board),
            )
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(outcome.timed_out, vec![AlgorithmKind::JaroWinkler]);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].kind, AlgorithmKind::ExactSuffix);
        assert_eq!(
            board.task_phase(AlgorithmKind::JaroWinkler),
            Some(TaskPhase::TimedOut)
        );
        let counts = dispatcher.metrics.outcomes(AlgorithmKind::JaroWinkler);
        assert_eq!((counts.timed_out, counts.completed), (1, 0));
        assert_eq!(dispatcher.metrics.outcomes(AlgorithmKind::ExactSuffix).completed, 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_result() {
        let dispatcher = dispatcher(500);
        let generations = TaskGeneration::new();
        let board = Arc::new(TaskBoard::new("pass-c"));
        let outcome = dispatcher
            .dispatch(
                tasks(vec![AlgorithmSpec::for_kind(AlgorithmKind::TokenJaccard)
                    .with_metric(Arc::new(Panicky))]),
                generations.guard(),
                board,
            )
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].status, TaskStatus::Failed);
        assert_eq!(dispatcher.metrics.outcomes(AlgorithmKind::TokenJaccard).failed, 1);
        assert!(outcome.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("metric exploded"));
    }

    #[tokio::test]
    async fn test_preempted_pass_stops_waiting() {
        let dispatcher = Arc::new(dispatcher(2_000));
        let generations = Arc::new(TaskGeneration::new());
        let board = Arc::new(TaskBoard::new("pass-d"));
        let slow = AlgorithmSpec::for_kind(AlgorithmKind::Levenshtein)
            .with_metric(Arc::new(Sleepy(Duration::from_millis(200))));

        let guard = generations.guard();
        let preempter = Arc::clone(&generations);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            preempter.cancel_and_advance();
        });

        let started = Instant::now();
        let outcome = dispatcher
            .dispatch(tasks(vec![slow]), guard, Arc::clone(&board))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(150));
        assert!(outcome.cancelled);
        assert!(outcome.results.is_empty());
        assert!(outcome.timed_out.is_empty());
        assert_eq!(
            board.task_phase(AlgorithmKind::Levenshtein),
            Some(TaskPhase::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_dispatch() {
        let dispatcher = dispatcher(100);
        dispatcher.shutdown(Duration::from_millis(100), || {});
        let generations = TaskGeneration::new();
        let result = dispatcher
            .dispatch(
                tasks(vec![AlgorithmSpec::for_kind(AlgorithmKind::ExactSuffix)]),
                generations.guard(),
                Arc::new(TaskBoard::new("pass-e")),
            )
            .await;
        assert!(matches!(result, Err(MatchError::ShutDown)));
    }
}
