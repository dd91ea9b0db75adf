//! One algorithm's pass over the dictionary and transcript batch.
//! Dictionary entries are the outer loop so cancellation can be observed
//! between entries; transcripts are the inner loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::cancellation::GenerationGuard;
use crate::catalog::{AlgorithmKind, AlgorithmSpec, EXACT_CONFIDENCE};
use crate::dictionary::normalize::{same_language, trailing_words};
use crate::dictionary::{CommandDictionary, CommandEntry, PreparedBatch};
use crate::similarity::MetricError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    TimedOut,
    Failed,
}

/// Outcome of one (algorithm, batch) pass. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub kind: AlgorithmKind,
    pub entry: Option<CommandEntry>,
    /// Index of the winning transcript within the batch.
    pub transcript_index: Option<usize>,
    pub confidence: f64,
    pub elapsed: Duration,
    pub status: TaskStatus,
    pub error: Option<String>,
}

impl MatchResult {
    pub fn no_match(kind: AlgorithmKind, elapsed: Duration) -> Self {
        Self {
            kind,
            entry: None,
            transcript_index: None,
            confidence: 0.0,
            elapsed,
            status: TaskStatus::Completed,
            error: None,
        }
    }

    pub fn matched(
        kind: AlgorithmKind,
        entry: CommandEntry,
        transcript_index: usize,
        confidence: f64,
        elapsed: Duration,
    ) -> Self {
        Self {
            kind,
            entry: Some(entry),
            transcript_index: Some(transcript_index),
            confidence,
            elapsed,
            status: TaskStatus::Completed,
            error: None,
        }
    }

    pub fn timed_out(kind: AlgorithmKind, elapsed: Duration) -> Self {
        Self {
            status: TaskStatus::TimedOut,
            ..Self::no_match(kind, elapsed)
        }
    }

    pub fn failed(kind: AlgorithmKind, elapsed: Duration, error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            error: Some(error.into()),
            ..Self::no_match(kind, elapsed)
        }
    }

    /// Completed with a matched entry.
    pub fn has_match(&self) -> bool {
        self.status == TaskStatus::Completed && self.entry.is_some()
    }
}

/// Independently cancellable unit of work for one algorithm kind.
pub struct MatchTask {
    spec: AlgorithmSpec,
    dictionary: Arc<CommandDictionary>,
    batch: Arc<PreparedBatch>,
    locale: Option<String>,
}

impl MatchTask {
    pub fn new(
        spec: AlgorithmSpec,
        dictionary: Arc<CommandDictionary>,
        batch: Arc<PreparedBatch>,
        locale: Option<String>,
    ) -> Self {
        Self {
            spec,
            dictionary,
            batch,
            locale,
        }
    }

    pub fn kind(&self) -> AlgorithmKind {
        self.spec.kind
    }

    fn wants_entry(&self, entry: &CommandEntry) -> bool {
        match &self.locale {
            Some(locale) => same_language(locale, entry.locale()),
            None => true,
        }
    }

    /// Best confidence of `key` against the whole candidate and against the
    /// candidate's trailing window of the same word count. `None` when the
    /// length pre-filter rejects both.
    fn score_pair(&self, candidate: &str, key: &str) -> Result<Option<f64>, MetricError> {
        let mut best: Option<f64> = None;

        if self.spec.passes_length_filter(candidate, key) {
            best = Some(self.spec.confidence(candidate, key)?);
        }
        if !self.spec.is_exact() {
            if let Some(tail) = trailing_words(candidate, key.split_whitespace().count()) {
                if self.spec.passes_length_filter(&tail, key) {
                    let conf = self.spec.confidence(&tail, key)?;
                    best = Some(best.map_or(conf, |b| b.max(conf)));
                }
            }
        }
        Ok(best)
    }

    /// Run to completion or until the guard fails. Never panics on
    /// cancellation; a cancelled run reports `TimedOut`.
    pub fn run(&self, guard: &GenerationGuard) -> MatchResult {
        let started = Instant::now();
        let kind = self.spec.kind;
        let floor = self.spec.acceptance.floor();
        let exact = self.spec.is_exact();

        // (entry index, transcript index, confidence)
        let mut best: Option<(usize, usize, f64)> = None;

        for (entry_idx, (entry, key)) in self.dictionary.iter().enumerate() {
            if !guard.should_continue() {
                debug!(algorithm = %kind, entries_done = entry_idx, "match task cancelled");
                return MatchResult::timed_out(kind, started.elapsed());
            }
            if !self.wants_entry(entry) {
                continue;
            }

            let candidates = self.batch.folded_for(entry.locale());
            for (transcript_idx, candidate) in candidates.iter().enumerate() {
                let confidence = match self.score_pair(candidate, key) {
                    Ok(Some(c)) => c,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(algorithm = %kind, error = %e, "metric failed");
                        return MatchResult::failed(kind, started.elapsed(), e.to_string());
                    }
                };
                if confidence < floor {
                    continue;
                }

                if exact {
                    // first qualifying pair wins, dictionary order breaks ties
                    return MatchResult::matched(
                        kind,
                        entry.clone(),
                        transcript_idx,
                        EXACT_CONFIDENCE,
                        started.elapsed(),
                    );
                }
                if best.map_or(true, |(_, _, b)| confidence > b) {
                    best = Some((entry_idx, transcript_idx, confidence));
                }
            }
        }

        match best {
            Some((entry_idx, transcript_idx, confidence)) => MatchResult::matched(
                kind,
                self.dictionary.entries()[entry_idx].clone(),
                transcript_idx,
                confidence,
                started.elapsed(),
            ),
            None => MatchResult::no_match(kind, started.elapsed()),
        }
    }
}
