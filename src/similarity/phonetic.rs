//! Phonetic agreement via Double Metaphone.
//! Words are aligned by position; the score is the share of aligned word
//! pairs whose codes agree, over the longer word count.

use rphonetic::DoubleMetaphone;

use super::{MetricError, RawScore, SimilarityMetric};

pub struct DoubleMetaphonePhrase;

fn words_agree(encoder: &DoubleMetaphone, left: &str, right: &str) -> bool {
    if left == right {
        return true;
    }
    // Double Metaphone only handles ASCII reliably
    if !left.is_ascii() || !right.is_ascii() {
        return false;
    }

    let l = encoder.double_metaphone(left);
    let r = encoder.double_metaphone(right);
    let l_primary = l.primary().to_string();
    let l_alternate = l.alternate().to_string();
    let r_primary = r.primary().to_string();
    let r_alternate = r.alternate().to_string();

    if l_primary.is_empty() || r_primary.is_empty() {
        return false;
    }
    l_primary == r_primary
        || (!l_alternate.is_empty() && l_alternate == r_primary)
        || (!r_alternate.is_empty() && l_primary == r_alternate)
}

/// Share of positionally aligned words that sound alike.
pub fn phonetic_agreement(candidate: &str, key_phrase: &str) -> f64 {
    let cand: Vec<&str> = candidate.split_whitespace().collect();
    let key: Vec<&str> = key_phrase.split_whitespace().collect();
    let longest = cand.len().max(key.len());
    if longest == 0 {
        return 1.0;
    }

    let encoder = DoubleMetaphone::default();
    let agreeing = cand
        .iter()
        .zip(key.iter())
        .filter(|(c, k)| words_agree(&encoder, c, k))
        .count();
    agreeing as f64 / longest as f64
}

impl SimilarityMetric for DoubleMetaphonePhrase {
    fn score(&self, candidate: &str, key_phrase: &str) -> Result<RawScore, MetricError> {
        Ok(RawScore::similarity(phonetic_agreement(candidate, key_phrase)))
    }
}
