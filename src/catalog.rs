//! Algorithm registry: the closed set of algorithm kinds, their acceptance
//! thresholds and score transforms, and the user-selectable active subset.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ConfigError;
use crate::similarity::alignment::NeedlemanWunsch;
use crate::similarity::edit::{JaroWinkler, Levenshtein};
use crate::similarity::phonetic::DoubleMetaphonePhrase;
use crate::similarity::suffix::ExactSuffix;
use crate::similarity::token::TokenJaccard;
use crate::similarity::{MetricError, RawScore, SimilarityMetric};

/// Shorter/longer length ratio a pair must reach before a graded metric runs.
pub const LENGTH_RATIO_FLOOR: f64 = 0.75;

/// Normalized confidence reported for an exact match.
pub const EXACT_CONFIDENCE: f64 = 1.0;

/// Algorithm kinds in declaration order. The order doubles as the tie-break
/// priority: earlier kinds win ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    ExactSuffix,
    NeedlemanWunsch,
    Levenshtein,
    JaroWinkler,
    TokenJaccard,
    DoubleMetaphone,
}

/// Identifier → kind. `regex` is the legacy name of the suffix fast path.
const KIND_TABLE: &[(&str, AlgorithmKind)] = &[
    ("exact_suffix", AlgorithmKind::ExactSuffix),
    ("regex", AlgorithmKind::ExactSuffix),
    ("needleman_wunsch", AlgorithmKind::NeedlemanWunsch),
    ("levenshtein", AlgorithmKind::Levenshtein),
    ("jaro_winkler", AlgorithmKind::JaroWinkler),
    ("token_jaccard", AlgorithmKind::TokenJaccard),
    ("double_metaphone", AlgorithmKind::DoubleMetaphone),
];

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 6] = [
        AlgorithmKind::ExactSuffix,
        AlgorithmKind::NeedlemanWunsch,
        AlgorithmKind::Levenshtein,
        AlgorithmKind::JaroWinkler,
        AlgorithmKind::TokenJaccard,
        AlgorithmKind::DoubleMetaphone,
    ];

    pub fn id(self) -> &'static str {
        match self {
            AlgorithmKind::ExactSuffix => "exact_suffix",
            AlgorithmKind::NeedlemanWunsch => "needleman_wunsch",
            AlgorithmKind::Levenshtein => "levenshtein",
            AlgorithmKind::JaroWinkler => "jaro_winkler",
            AlgorithmKind::TokenJaccard => "token_jaccard",
            AlgorithmKind::DoubleMetaphone => "double_metaphone",
        }
    }

    /// Case-insensitive identifier lookup.
    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.trim();
        KIND_TABLE
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(id))
            .map(|&(_, kind)| kind)
    }

    /// Position in declaration order; lower wins ties.
    pub fn priority(self) -> usize {
        self as usize
    }

    pub fn is_exact(self) -> bool {
        matches!(self, AlgorithmKind::ExactSuffix)
    }

    /// Histogram name for this kind's task latency.
    pub fn metric_name(self) -> &'static str {
        match self {
            AlgorithmKind::ExactSuffix => "t_task_exact_suffix",
            AlgorithmKind::NeedlemanWunsch => "t_task_needleman_wunsch",
            AlgorithmKind::Levenshtein => "t_task_levenshtein",
            AlgorithmKind::JaroWinkler => "t_task_jaro_winkler",
            AlgorithmKind::TokenJaccard => "t_task_token_jaccard",
            AlgorithmKind::DoubleMetaphone => "t_task_double_metaphone",
        }
    }
}

impl std::fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Which way a metric's native score improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScoreDirection {
    LowerIsBetter,
    HigherIsBetter,
}

impl ScoreDirection {
    /// Whether the score's own anchors run this way. A degenerate score
    /// (best == worst) agrees with either direction.
    pub fn agrees(self, raw: &RawScore) -> bool {
        if raw.best == raw.worst {
            return true;
        }
        (raw.best > raw.worst) == (self == ScoreDirection::HigherIsBetter)
    }
}

/// When a normalized confidence counts as a vote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acceptance {
    /// Boolean predicate: only a full match counts.
    Exact,
    /// Accept at or above `upper`, reject below `lower`, ambiguous between.
    Graded { lower: f64, upper: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Ambiguous,
    Reject,
}

impl Acceptance {
    pub fn verdict(&self, confidence: f64) -> Verdict {
        match *self {
            Acceptance::Exact => {
                if confidence >= EXACT_CONFIDENCE {
                    Verdict::Accept
                } else {
                    Verdict::Reject
                }
            }
            Acceptance::Graded { lower, upper } => {
                if confidence >= upper {
                    Verdict::Accept
                } else if confidence >= lower {
                    Verdict::Ambiguous
                } else {
                    Verdict::Reject
                }
            }
        }
    }

    /// Lowest confidence a pair needs to be retained by a task.
    pub fn floor(&self) -> f64 {
        match *self {
            Acceptance::Exact => EXACT_CONFIDENCE,
            Acceptance::Graded { lower, .. } => lower,
        }
    }
}

/// shorter / longer, counted in chars. Two empty strings give 1.0.
pub fn check_length(a: &str, b: &str) -> f64 {
    let a_len = a.chars().count();
    let b_len = b.chars().count();
    let longest = a_len.max(b_len);
    if longest == 0 {
        return 1.0;
    }
    a_len.min(b_len) as f64 / longest as f64
}

/// Static description of one algorithm kind.
#[derive(Clone)]
pub struct AlgorithmSpec {
    pub kind: AlgorithmKind,
    pub acceptance: Acceptance,
    /// Expected orientation of the metric's native score. The identical-pair
    /// and worst-case values come from the `RawScore` anchors themselves.
    pub direction: ScoreDirection,
    /// Length pre-filter; `None` disables it.
    pub length_ratio: Option<f64>,
    metric: Arc<dyn SimilarityMetric>,
}

impl std::fmt::Debug for AlgorithmSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmSpec")
            .field("kind", &self.kind)
            .field("acceptance", &self.acceptance)
            .field("direction", &self.direction)
            .field("length_ratio", &self.length_ratio)
            .finish()
    }
}

impl AlgorithmSpec {
    /// Default spec for a kind.
    pub fn for_kind(kind: AlgorithmKind) -> Self {
        let graded_band = Acceptance::Graded {
            lower: 0.88,
            upper: 0.93,
        };
        let (acceptance, direction, length_ratio, metric): (
            Acceptance,
            ScoreDirection,
            Option<f64>,
            Arc<dyn SimilarityMetric>,
        ) = match kind {
            // compares against the candidate tail, a whole-string ratio means nothing here
            AlgorithmKind::ExactSuffix => (
                Acceptance::Exact,
                ScoreDirection::HigherIsBetter,
                None,
                Arc::new(ExactSuffix),
            ),
            AlgorithmKind::NeedlemanWunsch => (
                Acceptance::Graded {
                    lower: 0.85,
                    upper: 0.85,
                },
                ScoreDirection::HigherIsBetter,
                Some(LENGTH_RATIO_FLOOR),
                Arc::new(NeedlemanWunsch::default()),
            ),
            AlgorithmKind::Levenshtein => (
                graded_band,
                ScoreDirection::LowerIsBetter,
                Some(LENGTH_RATIO_FLOOR),
                Arc::new(Levenshtein),
            ),
            AlgorithmKind::JaroWinkler => (
                graded_band,
                ScoreDirection::HigherIsBetter,
                Some(LENGTH_RATIO_FLOOR),
                Arc::new(JaroWinkler),
            ),
            AlgorithmKind::TokenJaccard => (
                Acceptance::Graded {
                    lower: 0.90,
                    upper: 0.90,
                },
                ScoreDirection::HigherIsBetter,
                Some(LENGTH_RATIO_FLOOR),
                Arc::new(TokenJaccard),
            ),
            AlgorithmKind::DoubleMetaphone => (
                Acceptance::Graded {
                    lower: 1.0,
                    upper: 1.0,
                },
                ScoreDirection::HigherIsBetter,
                Some(LENGTH_RATIO_FLOOR),
                Arc::new(DoubleMetaphonePhrase),
            ),
        };

        Self {
            kind,
            acceptance,
            direction,
            length_ratio,
            metric,
        }
    }

    /// Swap the comparison function, keeping thresholds and transform. The
    /// new metric's scores must run in this kind's `direction`.
    pub fn with_metric(mut self, metric: Arc<dyn SimilarityMetric>) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_acceptance(mut self, acceptance: Acceptance) -> Self {
        self.acceptance = acceptance;
        self
    }

    pub fn with_length_ratio(mut self, ratio: Option<f64>) -> Self {
        self.length_ratio = ratio;
        self
    }

    pub fn is_exact(&self) -> bool {
        matches!(self.acceptance, Acceptance::Exact)
    }

    /// Cheap rejection that runs before the metric.
    pub fn passes_length_filter(&self, candidate: &str, key_phrase: &str) -> bool {
        match self.length_ratio {
            Some(floor) => check_length(candidate, key_phrase) >= floor,
            None => true,
        }
    }

    /// Native score → comparable confidence in [0, 1]. A score oriented
    /// against `direction` is a broken metric and fails the task.
    pub fn normalize(&self, raw: RawScore) -> Result<f64, MetricError> {
        if !self.direction.agrees(&raw) {
            return Err(MetricError::Direction {
                expected: self.direction,
                best: raw.best,
                worst: raw.worst,
            });
        }
        Ok(raw.normalized())
    }

    /// Run the metric and normalize.
    pub fn confidence(&self, candidate: &str, key_phrase: &str) -> Result<f64, MetricError> {
        let raw = self.metric.score(candidate, key_phrase)?;
        self.normalize(raw)
    }
}

/// Registry of specs plus the session's algorithm override.
pub struct AlgorithmCatalog {
    specs: Vec<AlgorithmSpec>,
    override_ids: RwLock<Option<Vec<String>>>,
}

impl Default for AlgorithmCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl AlgorithmCatalog {
    /// Full default registry.
    pub fn new() -> Self {
        Self::with_specs(AlgorithmKind::ALL.iter().map(|&k| AlgorithmSpec::for_kind(k)).collect())
    }

    /// Registry with custom specs, kept in declaration order. A later spec for
    /// an already registered kind replaces the earlier one.
    pub fn with_specs(specs: Vec<AlgorithmSpec>) -> Self {
        let mut by_kind: Vec<AlgorithmSpec> = Vec::with_capacity(specs.len());
        for spec in specs {
            match by_kind.iter_mut().find(|s| s.kind == spec.kind) {
                Some(existing) => *existing = spec,
                None => by_kind.push(spec),
            }
        }
        by_kind.sort_by_key(|s| s.kind.priority());
        Self {
            specs: by_kind,
            override_ids: RwLock::new(None),
        }
    }

    /// Validated override from the settings collaborator. `None` or an empty
    /// list restores the default set.
    pub fn set_override(&self, ids: Option<&[&str]>) -> Result<(), ConfigError> {
        let ids = match ids {
            Some(ids) if !ids.is_empty() => ids,
            _ => {
                *self.override_ids.write() = None;
                info!("algorithm override cleared");
                return Ok(());
            }
        };

        if let Some(unknown) = ids.iter().find(|id| AlgorithmKind::from_id(id).is_none()) {
            return Err(ConfigError::UnknownAlgorithm(unknown.to_string()));
        }
        let owned: Vec<String> = ids.iter().map(|id| id.trim().to_string()).collect();
        info!(algorithms = ?owned, "algorithm override set");
        *self.override_ids.write() = Some(owned);
        Ok(())
    }

    /// Install a persisted override without validation. Identifiers of kinds
    /// that no longer exist are kept and ignored at read time.
    pub fn restore_override(&self, ids: Option<Vec<String>>) {
        *self.override_ids.write() = ids.filter(|ids| !ids.is_empty());
    }

    pub fn override_ids(&self) -> Option<Vec<String>> {
        self.override_ids.read().clone()
    }

    pub fn spec(&self, kind: AlgorithmKind) -> Option<&AlgorithmSpec> {
        self.specs.iter().find(|s| s.kind == kind)
    }

    /// Active specs in declaration order.
    pub fn active_algorithms(&self) -> Vec<AlgorithmSpec> {
        let guard = self.override_ids.read();
        let Some(ids) = guard.as_ref() else {
            return self.specs.clone();
        };

        let wanted: Vec<AlgorithmKind> = ids
            .iter()
            .filter_map(|id| {
                let kind = AlgorithmKind::from_id(id);
                if kind.is_none() {
                    debug!(algorithm = %id, "override names a retired algorithm, skipping");
                }
                kind
            })
            .collect();

        let active: Vec<AlgorithmSpec> = self
            .specs
            .iter()
            .filter(|s| wanted.contains(&s.kind))
            .cloned()
            .collect();

        if active.is_empty() {
            debug!("override resolved to no known algorithm, using defaults");
            return self.specs.clone();
        }
        active
    }
}
