//! Engine telemetry: latency windows keyed by timer name, and per-algorithm
//! outcome counters so a kind that keeps missing its deadline shows up.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::catalog::AlgorithmKind;
use crate::state_machine::TaskPhase;

/// Latest samples kept per timer.
const WINDOW: usize = 512;

/// Identifiers attached to every match pass.
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub pass_id: String,
    pub generation: u64,
}

impl RequestIds {
    pub fn new(generation: u64) -> Self {
        Self {
            pass_id: uuid::Uuid::new_v4().to_string(),
            generation,
        }
    }
}

/// Sliding window of the most recent durations for one timer.
#[derive(Default)]
struct LatencyWindow {
    samples: VecDeque<Duration>,
}

impl LatencyWindow {
    fn push(&mut self, sample: Duration) {
        if self.samples.len() == WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn summary(&self) -> LatencySummary {
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        LatencySummary {
            p50_us: nearest_rank(&sorted, 50),
            p95_us: nearest_rank(&sorted, 95),
            p99_us: nearest_rank(&sorted, 99),
            samples: sorted.len(),
        }
    }
}

/// Nearest-rank percentile of an ascending slice, in microseconds.
fn nearest_rank(sorted: &[Duration], pct: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (pct * sorted.len()).div_ceil(100).max(1);
    sorted[rank - 1].as_micros() as u64
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub samples: usize,
}

/// How one algorithm's tasks have ended so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub completed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub failed: u64,
}

/// Point-in-time copy of everything the registry holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub passes: u64,
    /// Passes whose decision named an entry.
    pub matched: u64,
    pub latencies: BTreeMap<String, LatencySummary>,
    pub algorithms: BTreeMap<AlgorithmKind, OutcomeCounts>,
}

#[derive(Default)]
struct Tallies {
    passes: u64,
    matched: u64,
    latencies: HashMap<&'static str, LatencyWindow>,
    outcomes: BTreeMap<AlgorithmKind, OutcomeCounts>,
}

#[derive(Default)]
pub struct MetricsRegistry {
    tallies: Mutex<Tallies>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, timer: &'static str, elapsed: Duration) {
        self.tallies
            .lock()
            .latencies
            .entry(timer)
            .or_default()
            .push(elapsed);
    }

    /// Times from now until `Stopwatch::stop`.
    pub fn stopwatch(&self, timer: &'static str) -> Stopwatch<'_> {
        Stopwatch {
            timer,
            started: Instant::now(),
            registry: self,
        }
    }

    /// Count a task's terminal phase. Non-terminal phases are ignored.
    pub fn record_outcome(&self, kind: AlgorithmKind, phase: TaskPhase) {
        let mut tallies = self.tallies.lock();
        let counts = tallies.outcomes.entry(kind).or_default();
        match phase {
            TaskPhase::Completed => counts.completed += 1,
            TaskPhase::TimedOut => counts.timed_out += 1,
            TaskPhase::Cancelled => counts.cancelled += 1,
            TaskPhase::Failed => counts.failed += 1,
            TaskPhase::Queued | TaskPhase::Running => {}
        }
    }

    pub fn record_pass(&self, matched: bool) {
        let mut tallies = self.tallies.lock();
        tallies.passes += 1;
        if matched {
            tallies.matched += 1;
        }
    }

    pub fn outcomes(&self, kind: AlgorithmKind) -> OutcomeCounts {
        self.tallies
            .lock()
            .outcomes
            .get(&kind)
            .copied()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let tallies = self.tallies.lock();
        MetricsSnapshot {
            passes: tallies.passes,
            matched: tallies.matched,
            latencies: tallies
                .latencies
                .iter()
                .map(|(name, window)| (name.to_string(), window.summary()))
                .collect(),
            algorithms: tallies.outcomes.clone(),
        }
    }
}

pub struct Stopwatch<'a> {
    timer: &'static str,
    started: Instant,
    registry: &'a MetricsRegistry,
}

impl Stopwatch<'_> {
    /// Record and return the elapsed time.
    pub fn stop(self) -> Duration {
        let elapsed = self.started.elapsed();
        self.registry.observe(self.timer, elapsed);
        elapsed
    }
}

/// Timer names. Per-algorithm task latency lives under
/// `AlgorithmKind::metric_name`.
pub mod timers {
    pub const PASS: &str = "t_pass_decided";
    pub const QUEUE_WAIT: &str = "t_queue_wait";
    pub const DRAIN: &str = "t_deadline_drain";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_rank_percentiles() {
        let registry = MetricsRegistry::new();
        for us in 1..=100 {
            registry.observe(timers::PASS, Duration::from_micros(us));
        }
        let summary = registry.snapshot().latencies[timers::PASS];
        assert_eq!(summary.p50_us, 50);
        assert_eq!(summary.p95_us, 95);
        assert_eq!(summary.p99_us, 99);
        assert_eq!(summary.samples, 100);
    }

    #[test]
    fn test_window_keeps_latest_samples() {
        let mut window = LatencyWindow::default();
        for us in 0..(WINDOW as u64 + 10) {
            window.push(Duration::from_micros(us));
        }
        let summary = window.summary();
        assert_eq!(summary.samples, WINDOW);
        assert_eq!(summary.p99_us, WINDOW as u64 + 4);
        assert!(nearest_rank(&[], 50) == 0);
    }

    #[test]
    fn test_outcomes_counted_per_kind() {
        let registry = MetricsRegistry::new();
        registry.record_outcome(AlgorithmKind::Levenshtein, TaskPhase::TimedOut);
        registry.record_outcome(AlgorithmKind::Levenshtein, TaskPhase::TimedOut);
        registry.record_outcome(AlgorithmKind::Levenshtein, TaskPhase::Completed);
        registry.record_outcome(AlgorithmKind::ExactSuffix, TaskPhase::Failed);
        registry.record_outcome(AlgorithmKind::ExactSuffix, TaskPhase::Running);

        let lev = registry.outcomes(AlgorithmKind::Levenshtein);
        assert_eq!(lev.timed_out, 2);
        assert_eq!(lev.completed, 1);
        assert_eq!(
            registry.outcomes(AlgorithmKind::ExactSuffix),
            OutcomeCounts {
                failed: 1,
                ..OutcomeCounts::default()
            }
        );
        assert_eq!(registry.outcomes(AlgorithmKind::DoubleMetaphone), OutcomeCounts::default());
    }

    #[test]
    fn test_snapshot_serializes_kind_keys() {
        let registry = MetricsRegistry::new();
        registry.record_pass(true);
        registry.record_pass(false);
        registry.record_outcome(AlgorithmKind::JaroWinkler, TaskPhase::Cancelled);
        registry.stopwatch(timers::QUEUE_WAIT).stop();

        let snapshot = registry.snapshot();
        assert_eq!((snapshot.passes, snapshot.matched), (2, 1));
        assert_eq!(snapshot.latencies[timers::QUEUE_WAIT].samples, 1);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["algorithms"]["jaro_winkler"]["cancelled"], 1);
    }
}
