//! Exact-suffix fast path: a candidate matches when it ends with the key
//! phrase, compared grapheme by grapheme.

use unicode_segmentation::UnicodeSegmentation;

use super::{MetricError, RawScore, SimilarityMetric};

/// True iff `candidate` ends with `key_phrase` on grapheme boundaries.
/// An empty key phrase never matches.
pub fn ends_with_phrase(candidate: &str, key_phrase: &str) -> bool {
    if key_phrase.is_empty() || key_phrase.len() > candidate.len() {
        return false;
    }
    let key: Vec<&str> = key_phrase.graphemes(true).collect();
    let tail: Vec<&str> = candidate.graphemes(true).rev().take(key.len()).collect();
    tail.len() == key.len() && tail.iter().rev().eq(key.iter())
}

pub struct ExactSuffix;

impl SimilarityMetric for ExactSuffix {
    fn score(&self, candidate: &str, key_phrase: &str) -> Result<RawScore, MetricError> {
        Ok(RawScore::boolean(ends_with_phrase(candidate, key_phrase)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_match() {
        assert!(ends_with_phrase("please turn off wifi", "turn off wifi"));
        assert!(ends_with_phrase("turn off wifi", "turn off wifi"));
    }

    #[test]
    fn test_suffix_no_match() {
        assert!(!ends_with_phrase("turn off wifi please", "turn off wifi"));
        assert!(!ends_with_phrase("wifi", "turn off wifi"));
        assert!(!ends_with_phrase("anything", ""));
    }

    #[test]
    fn test_grapheme_boundary() {
        // "e" + combining acute is one grapheme; a bare "\u{301}" suffix must not match it
        assert!(!ends_with_phrase("cafe\u{301}", "\u{301}"));
        assert!(ends_with_phrase("un cafe\u{301}", "cafe\u{301}"));
    }
}
