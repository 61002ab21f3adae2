//! Pluggable string similarity over canonical payloads.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Similarity of two canonical payloads in `[0, 1]`.
pub trait SimilarityFn: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> f64;
}

impl<F> SimilarityFn for F
where
    F: Fn(&str, &str) -> f64 + Send + Sync,
{
    fn similarity(&self, a: &str, b: &str) -> f64 {
        self(a, b)
    }
}

/// Jaccard index over character bigrams.
#[derive(Debug, Clone, Copy, Default)]
pub struct BigramJaccard;

fn bigrams(s: &str) -> HashSet<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

impl SimilarityFn for BigramJaccard {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        let (ba, bb) = (bigrams(a), bigrams(b));
        if ba.is_empty() && bb.is_empty() {
            return 0.0;
        }
        let inter = ba.intersection(&bb).count();
        let union = ba.len() + bb.len() - inter;
        inter as f64 / union as f64
    }
}

/// `1 - levenshtein(a, b) / max(len)`, over chars. Quadratic; meant for short payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct LevenshteinRatio;

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

impl SimilarityFn for LevenshteinRatio {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        let (ca, cb): (Vec<char>, Vec<char>) = (a.chars().collect(), b.chars().collect());
        let longest = ca.len().max(cb.len());
        if longest == 0 {
            return 1.0;
        }
        1.0 - levenshtein(&ca, &cb) as f64 / longest as f64
    }
}

/// Built-in strategies selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityKind {
    #[default]
    BigramJaccard,
    LevenshteinRatio,
}

impl SimilarityKind {
    pub fn build(self) -> Box<dyn SimilarityFn> {
        match self {
            SimilarityKind::BigramJaccard => Box::new(BigramJaccard),
            SimilarityKind::LevenshteinRatio => Box::new(LevenshteinRatio),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bigram_jaccard_bounds() {
        let j = BigramJaccard;
        assert_eq!(j.similarity("abcdef", "abcdef"), 1.0);
        assert_eq!(j.similarity("abab", "cdcd"), 0.0);
        let s = j.similarity("night", "nacht");
        assert!(s > 0.0 && s < 1.0);
    }

    #[test]
    fn levenshtein_ratio_known_values() {
        let l = LevenshteinRatio;
        assert_eq!(l.similarity("kitten", "sitting"), 1.0 - 3.0 / 7.0);
        assert_eq!(l.similarity("", ""), 1.0);
        assert_eq!(l.similarity("abc", ""), 0.0);
    }

    #[test]
    fn closures_are_similarity_fns() {
        let always_half = |_: &str, _: &str| 0.5;
        let boxed: Box<dyn SimilarityFn> = Box::new(always_half);
        assert_eq!(boxed.similarity("x", "y"), 0.5);
    }

    #[test]
    fn kind_builds_matching_strategy() {
        let s = SimilarityKind::LevenshteinRatio.build();
        assert_eq!(s.similarity("abcd", "abce"), 0.75);
    }
}
