//! Edit-distance style metrics backed by `strsim`.

use super::{MetricError, RawScore, SimilarityMetric};

/// Character Levenshtein distance. Lower is better; the worst case for a
/// pair is the length of the longer string.
pub struct Levenshtein;

impl SimilarityMetric for Levenshtein {
    fn score(&self, candidate: &str, key_phrase: &str) -> Result<RawScore, MetricError> {
        let distance = strsim::levenshtein(candidate, key_phrase) as f64;
        let longest = candidate.chars().count().max(key_phrase.chars().count()) as f64;
        Ok(RawScore::new(distance, 0.0, longest))
    }
}

/// Jaro-Winkler similarity, already in [0, 1].
pub struct JaroWinkler;

impl SimilarityMetric for JaroWinkler {
    fn score(&self, candidate: &str, key_phrase: &str) -> Result<RawScore, MetricError> {
        Ok(RawScore::similarity(strsim::jaro_winkler(candidate, key_phrase)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_normalization() {
        let raw = Levenshtein.score("helo", "hello").unwrap();
        assert_eq!(raw.value, 1.0);
        assert_eq!(raw.worst, 5.0);
        assert!((raw.normalized() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(Levenshtein.score("", "").unwrap().normalized(), 1.0);
        assert_eq!(Levenshtein.score("abc", "").unwrap().normalized(), 0.0);
    }

    #[test]
    fn test_jaro_winkler() {
        assert_eq!(JaroWinkler.score("lights", "lights").unwrap().normalized(), 1.0);
        let close = JaroWinkler.score("lights on", "light on").unwrap().normalized();
        let far = JaroWinkler.score("lights on", "play music").unwrap().normalized();
        assert!(close > far);
    }
}
