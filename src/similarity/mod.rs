//! String similarity metrics.
//! Each metric compares one folded candidate transcript against one folded key
//! phrase and reports the result in its own native scale. Normalization onto
//! [0, 1] happens in the catalog, which knows each kind's direction.

pub mod alignment;
pub mod edit;
pub mod phonetic;
pub mod suffix;
pub mod token;

use crate::catalog::ScoreDirection;

/// A score in a metric's native scale, together with the native values that
/// stand for "identical" (`best`) and "nothing in common" (`worst`) for the
/// pair that was compared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawScore {
    pub value: f64,
    pub best: f64,
    pub worst: f64,
}

impl RawScore {
    pub fn new(value: f64, best: f64, worst: f64) -> Self {
        Self { value, best, worst }
    }

    /// Predicate result: 1 on hit, 0 on miss.
    pub fn boolean(hit: bool) -> Self {
        Self::new(if hit { 1.0 } else { 0.0 }, 1.0, 0.0)
    }

    /// A similarity that already lives in [0, 1].
    pub fn similarity(value: f64) -> Self {
        Self::new(value, 1.0, 0.0)
    }

    /// Linear map sending `worst` to 0.0 and `best` to 1.0, clamped.
    pub fn normalized(&self) -> f64 {
        let span = self.best - self.worst;
        if span == 0.0 || !span.is_finite() {
            return if self.value == self.best { 1.0 } else { 0.0 };
        }
        let scaled = (self.value - self.worst) / span;
        if scaled.is_nan() {
            return 0.0;
        }
        scaled.clamp(0.0, 1.0)
    }
}

/// Internal metric failure. Fatal to the task that hit it, never to the pass.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricError {
    InvalidCost(String),
    /// The score's anchors run against the kind's declared direction.
    Direction {
        expected: ScoreDirection,
        best: f64,
        worst: f64,
    },
}

impl std::fmt::Display for MetricError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricError::InvalidCost(msg) => write!(f, "invalid metric cost: {msg}"),
            MetricError::Direction {
                expected,
                best,
                worst,
            } => write!(
                f,
                "score anchors best={best} worst={worst} disagree with {expected:?}"
            ),
        }
    }
}

impl std::error::Error for MetricError {}

/// Comparison function for one algorithm kind.
pub trait SimilarityMetric: Send + Sync {
    /// Compare a candidate transcript with a key phrase. Both inputs are
    /// already case-folded and trimmed.
    fn score(&self, candidate: &str, key_phrase: &str) -> Result<RawScore, MetricError>;
}
