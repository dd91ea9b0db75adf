//! Needleman-Wunsch global alignment in linear space.
//!
//! Costs are non-positive: a match costs nothing, a substitution costs
//! `mismatch`, an insertion or deletion costs `gap`. The DP keeps only two
//! rows sized by the shorter operand, so memory is O(min(len a, len b)).
//!
//! The native score is the best alignment score (higher is better, at most
//! zero with default costs). It normalizes against the bounds reachable for
//! the longer length `L`:
//!
//! ```text
//! best  = L * max(match, gap)
//! worst = L * min(mismatch, gap)
//! similarity = (score - worst) / (best - worst)
//! ```

use super::{MetricError, RawScore, SimilarityMetric};

/// Substitution and gap costs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentCosts {
    pub matched: f64,
    pub mismatch: f64,
    pub gap: f64,
}

impl Default for AlignmentCosts {
    fn default() -> Self {
        Self {
            matched: 0.0,
            mismatch: -1.0,
            gap: -2.0,
        }
    }
}

impl AlignmentCosts {
    pub fn validate(&self) -> Result<(), MetricError> {
        if !(self.matched.is_finite() && self.mismatch.is_finite() && self.gap.is_finite()) {
            return Err(MetricError::InvalidCost("costs must be finite".into()));
        }
        if self.gap > 0.0 {
            return Err(MetricError::InvalidCost(format!(
                "gap penalty must be <= 0, got {}",
                self.gap
            )));
        }
        if self.mismatch > self.matched {
            return Err(MetricError::InvalidCost(format!(
                "mismatch cost {} exceeds match cost {}",
                self.mismatch, self.matched
            )));
        }
        Ok(())
    }

    #[inline]
    fn substitution(&self, a: char, b: char) -> f64 {
        if a == b {
            self.matched
        } else {
            self.mismatch
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NeedlemanWunsch {
    costs: AlignmentCosts,
}

impl NeedlemanWunsch {
    pub fn new(costs: AlignmentCosts) -> Self {
        Self { costs }
    }

    pub fn costs(&self) -> AlignmentCosts {
        self.costs
    }

    /// Best global alignment score of `a` against `b`.
    pub fn alignment_score(&self, a: &[char], b: &[char]) -> f64 {
        // rows are indexed by the shorter operand
        let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
        let gap = self.costs.gap;

        let mut prev: Vec<f64> = (0..=short.len()).map(|j| j as f64 * gap).collect();
        let mut curr: Vec<f64> = vec![0.0; short.len() + 1];

        for (i, &lc) in long.iter().enumerate() {
            curr[0] = (i + 1) as f64 * gap;
            for (j, &sc) in short.iter().enumerate() {
                let up = prev[j + 1] + gap;
                let left = curr[j] + gap;
                let diag = prev[j] + self.costs.substitution(lc, sc);
                curr[j + 1] = up.max(left).max(diag);
            }
            std::mem::swap(&mut prev, &mut curr);
        }

        prev[short.len()]
    }

    /// Normalized similarity in [0, 1].
    pub fn similarity(&self, a: &str, b: &str) -> Result<f64, MetricError> {
        self.score(a, b).map(|raw| raw.normalized())
    }
}

impl SimilarityMetric for NeedlemanWunsch {
    fn score(&self, candidate: &str, key_phrase: &str) -> Result<RawScore, MetricError> {
        self.costs.validate()?;

        let a: Vec<char> = candidate.chars().collect();
        let b: Vec<char> = key_phrase.chars().collect();
        if a.is_empty() && b.is_empty() {
            return Ok(RawScore::new(0.0, 0.0, 0.0));
        }

        let longest = a.len().max(b.len()) as f64;
        let best = longest * self.costs.matched.max(self.costs.gap);
        let worst = longest * self.costs.mismatch.min(self.costs.gap);

        // either side empty: every char of the other one is a gap
        let score = if a.is_empty() || b.is_empty() {
            self.costs.gap * longest
        } else {
            self.alignment_score(&a, &b)
        };

        Ok(RawScore::new(score, best, worst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim(a: &str, b: &str) -> f64 {
        NeedlemanWunsch::default().similarity(a, b).unwrap()
    }

    #[test]
    fn test_identity() {
        for s in ["", "a", "call mum", "turn off the lights"] {
            assert_eq!(sim(s, s), 1.0, "sim({s:?}, {s:?})");
        }
    }

    #[test]
    fn test_symmetric_and_bounded() {
        let pairs = [
            ("call mum", "cal mom"),
            ("hello", "world"),
            ("a", "abcdef"),
            ("lights on", "lights off"),
            ("", "abc"),
        ];
        for (a, b) in pairs {
            let ab = sim(a, b);
            let ba = sim(b, a);
            assert_eq!(ab, ba, "asymmetric for {a:?} / {b:?}");
            assert!((0.0..=1.0).contains(&ab), "{ab} out of range");
        }
    }

    #[test]
    fn test_generated_pairs_symmetric_bounded_reflexive() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        const ALPHABET: &[char] = &['a', 'b', 'c', ' ', 'é', 'ı', 'ß', '日', 'ö'];
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let word = |rng: &mut StdRng, max_len: usize| -> String {
            let len = rng.gen_range(0..=max_len);
            (0..len)
                .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())])
                .collect()
        };

        for round in 0..400 {
            // every other pair is heavily length-skewed
            let (a, b) = if round % 2 == 0 {
                (word(&mut rng, 30), word(&mut rng, 3))
            } else {
                (word(&mut rng, 12), word(&mut rng, 12))
            };
            let ab = sim(&a, &b);
            assert_eq!(ab, sim(&b, &a), "asymmetric for {a:?} / {b:?}");
            assert!((0.0..=1.0).contains(&ab), "{ab} out of range for {a:?} / {b:?}");
            assert_eq!(sim(&a, &a), 1.0, "sim({a:?}, {a:?})");
        }
    }

    #[test]
    fn test_empty_base_case() {
        let nw = NeedlemanWunsch::default();
        let raw = nw.score("abc", "").unwrap();
        assert_eq!(raw.value, -6.0);
        assert_eq!(sim("abc", ""), 0.0);
        assert_eq!(sim("", "abc"), sim("abc", ""));
        assert_eq!(sim("", ""), 1.0);
    }

    #[test]
    fn test_known_alignment() {
        // one gap (-2) and one substitution (-1) over L = 8
        let nw = NeedlemanWunsch::default();
        let a: Vec<char> = "call mum".chars().collect();
        let b: Vec<char> = "cal mom".chars().collect();
        assert_eq!(nw.alignment_score(&a, &b), -3.0);
        assert!((sim("call mum", "cal mom") - 0.8125).abs() < 1e-9);
    }

    #[test]
    fn test_single_substitution() {
        // -1 over L = 4, worst = -8
        assert!((sim("cats", "cuts") - 7.0 / 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_positive_gap_rejected() {
        let nw = NeedlemanWunsch::new(AlignmentCosts {
            matched: 0.0,
            mismatch: -1.0,
            gap: 0.5,
        });
        assert!(matches!(
            nw.score("a", "b"),
            Err(MetricError::InvalidCost(_))
        ));
    }
}
