//! Word-set overlap (Jaccard index).

use std::collections::HashSet;

use super::{MetricError, RawScore, SimilarityMetric};

pub struct TokenJaccard;

/// |A ∩ B| / |A ∪ B| over whitespace-separated words. Two empty inputs are
/// identical.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let left: HashSet<&str> = a.split_whitespace().collect();
    let right: HashSet<&str> = b.split_whitespace().collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 1.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

impl SimilarityMetric for TokenJaccard {
    fn score(&self, candidate: &str, key_phrase: &str) -> Result<RawScore, MetricError> {
        Ok(RawScore::similarity(jaccard(candidate, key_phrase)))
    }
}
