//! Reduces a pass's results to one `Decision`.
//! Pure: the same result list always yields the same decision, whatever
//! order the tasks finished in.

use std::cmp::Ordering;

use serde::Serialize;

use crate::catalog::{Acceptance, AlgorithmKind, AlgorithmSpec, Verdict};
use crate::dictionary::{CommandEntry, TranscriptBatch};
use crate::task::{MatchResult, TaskStatus};

/// Final outcome of a match pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub entry: Option<CommandEntry>,
    pub kind: Option<AlgorithmKind>,
    pub confidence: f64,
    pub transcript_index: Option<usize>,
    /// Raw text of the winning transcript.
    pub transcript: Option<String>,
    /// Recognizer confidence of the winning transcript.
    pub transcript_confidence: Option<f32>,
    /// Kinds that lost their vote to the deadline.
    pub timed_out: Vec<AlgorithmKind>,
    /// Kinds that lost their vote to an internal failure.
    pub failed: Vec<AlgorithmKind>,
}

impl Decision {
    pub fn no_match() -> Self {
        Self {
            entry: None,
            kind: None,
            confidence: 0.0,
            transcript_index: None,
            transcript: None,
            transcript_confidence: None,
            timed_out: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.entry.is_some()
    }

    pub fn payload_id(&self) -> Option<u64> {
        self.entry.as_ref().map(CommandEntry::payload_id)
    }

    /// Resolve the winning transcript index against the batch it came from.
    pub fn with_transcript(mut self, batch: &TranscriptBatch) -> Self {
        let winner = self
            .transcript_index
            .and_then(|idx| batch.transcripts().get(idx));
        self.transcript = winner.map(|t| t.text.clone());
        self.transcript_confidence = winner.map(|t| t.confidence);
        self
    }

    /// Merge kinds the dispatcher expired into the diagnostics.
    pub fn with_timed_out(mut self, kinds: impl IntoIterator<Item = AlgorithmKind>) -> Self {
        self.timed_out.extend(kinds);
        self.timed_out.sort();
        self.timed_out.dedup();
        self
    }
}

pub struct DecisionPolicy {
    acceptance: Vec<(AlgorithmKind, Acceptance)>,
}

impl DecisionPolicy {
    /// Policy over the specs that were active for the pass.
    pub fn new(specs: &[AlgorithmSpec]) -> Self {
        Self {
            acceptance: specs.iter().map(|s| (s.kind, s.acceptance)).collect(),
        }
    }

    fn acceptance_for(&self, kind: AlgorithmKind) -> Option<Acceptance> {
        self.acceptance
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, a)| *a)
    }

    pub fn decide(&self, results: &[MatchResult]) -> Decision {
        let mut winner: Option<(&MatchResult, bool)> = None;
        let mut timed_out = Vec::new();
        let mut failed = Vec::new();

        for result in results {
            match result.status {
                TaskStatus::TimedOut => {
                    timed_out.push(result.kind);
                    continue;
                }
                TaskStatus::Failed => {
                    failed.push(result.kind);
                    continue;
                }
                TaskStatus::Completed => {}
            }
            if result.entry.is_none() {
                continue;
            }
            let Some(acceptance) = self.acceptance_for(result.kind) else {
                continue;
            };
            // an ambiguous band casts no vote
            if acceptance.verdict(result.confidence) != Verdict::Accept {
                continue;
            }

            let exact = matches!(acceptance, Acceptance::Exact);
            let better = match winner {
                None => true,
                Some((current, current_exact)) => {
                    rank(result, exact, current, current_exact) == Ordering::Greater
                }
            };
            if better {
                winner = Some((result, exact));
            }
        }

        let decision = match winner {
            Some((result, _)) => Decision {
                entry: result.entry.clone(),
                kind: Some(result.kind),
                confidence: result.confidence,
                transcript_index: result.transcript_index,
                ..Decision::no_match()
            },
            None => Decision::no_match(),
        };

        failed.sort();
        failed.dedup();
        Decision { failed, ..decision }.with_timed_out(timed_out)
    }
}

/// Exact beats graded; then higher confidence; then earlier declaration.
fn rank(a: &MatchResult, a_exact: bool, b: &MatchResult, b_exact: bool) -> Ordering {
    a_exact
        .cmp(&b_exact)
        .then_with(|| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| b.kind.priority().cmp(&a.kind.priority()))
}
