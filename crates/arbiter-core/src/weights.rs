//! Softmax weight normalization with a minimum-weight floor.

use crate::config::WeightsConfig;
use crate::domain::{CompositeScore, WeightVector};

#[derive(Debug, Clone)]
pub struct WeightNormalizer {
    temperature: f64,
    floor: f64,
}

impl WeightNormalizer {
    pub fn new(config: &WeightsConfig) -> Self {
        Self {
            temperature: config.temperature,
            floor: config.floor,
        }
    }

    /// Turn composites into a sum-to-one vector.
    ///
    /// Ineligible workers are listed with weight exactly 0 and take no part
    /// in the softmax or the floor.
    pub fn normalize(&self, scores: &[CompositeScore]) -> WeightVector {
        let eligible: Vec<&CompositeScore> = scores.iter().filter(|s| s.eligible).collect();
        let weights = floor_weights(softmax(&eligible, self.temperature), self.floor);

        let mut entries: Vec<_> = eligible
            .iter()
            .zip(weights)
            .map(|(s, w)| (s.worker_id.clone(), w))
            .collect();
        entries.extend(
            scores
                .iter()
                .filter(|s| !s.eligible)
                .map(|s| (s.worker_id.clone(), 0.0)),
        );
        WeightVector::from_entries(entries)
    }
}

fn softmax(scores: &[&CompositeScore], temperature: f64) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let max = scores
        .iter()
        .map(|s| s.composite)
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores
        .iter()
        .map(|s| ((s.composite - max) / temperature).exp())
        .collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Raise weights below `floor` to it, redistributing the remaining mass
/// proportionally over the rest until nothing is below the floor.
fn floor_weights(weights: Vec<f64>, floor: f64) -> Vec<f64> {
    let n = weights.len();
    if n == 0 || floor <= 0.0 {
        return weights;
    }
    if floor * n as f64 >= 1.0 {
        return vec![1.0 / n as f64; n];
    }

    let mut pinned = vec![false; n];
    loop {
        let pinned_count = pinned.iter().filter(|p| **p).count();
        let free_mass = 1.0 - floor * pinned_count as f64;
        let free_sum: f64 = weights
            .iter()
            .zip(&pinned)
            .filter(|(_, p)| !**p)
            .map(|(w, _)| w)
            .sum();
        if free_sum <= 0.0 {
            let free = n - pinned_count;
            return (0..n)
                .map(|i| if pinned[i] { floor } else { free_mass / free as f64 })
                .collect();
        }

        let scaled: Vec<f64> = (0..n)
            .map(|i| if pinned[i] { floor } else { weights[i] / free_sum * free_mass })
            .collect();
        let mut changed = false;
        for i in 0..n {
            if !pinned[i] && scaled[i] < floor {
                pinned[i] = true;
                changed = true;
            }
        }
        if !changed {
            return scaled;
        }
    }
}
