//! Score breakdowns, composite scores and weight vectors.

use arbiter_state::WorkerId;
use serde::{Deserialize, Serialize};

pub const TECHNICAL_MAX: f64 = 30.0;
pub const STRUCTURE_MAX: f64 = 40.0;
pub const CONTENT_MAX: f64 = 30.0;

fn clamp(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, max)
    }
}

/// Per-response quality score. `total` is always the sum of the components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub technical: f64,
    pub structure: f64,
    pub content: f64,
    pub total: f64,
}

impl ScoreBreakdown {
    /// Clamp each component to its range and derive the total.
    pub fn new(technical: f64, structure: f64, content: f64) -> Self {
        let technical = clamp(technical, TECHNICAL_MAX);
        let structure = clamp(structure, STRUCTURE_MAX);
        let content = clamp(content, CONTENT_MAX);
        Self {
            technical,
            structure,
            content,
            total: technical + structure + content,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Multiply every component by `factor` (clamped to [0, 1]).
    pub fn scaled(&self, factor: f64) -> Self {
        let factor = clamp(factor, 1.0);
        Self::new(
            self.technical * factor,
            self.structure * factor,
            self.content * factor,
        )
    }
}

/// Blended reputation of one worker, all parts in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub worker_id: WorkerId,
    pub stake_weight: f64,
    pub quality_component: f64,
    pub history_component: f64,
    pub composite: f64,
    /// False for blacklisted workers; they are pinned to zero weight.
    pub eligible: bool,
}

/// Normalized reward weights ordered by worker id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    entries: Vec<(WorkerId, f64)>,
}

impl WeightVector {
    pub fn from_entries(mut entries: Vec<(WorkerId, f64)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, worker: &WorkerId) -> Option<f64> {
        self.entries
            .binary_search_by(|(id, _)| id.cmp(worker))
            .ok()
            .map(|i| self.entries[i].1)
    }

    pub fn sum(&self) -> f64 {
        self.entries.iter().map(|(_, w)| w).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&WorkerId, f64)> {
        self.entries.iter().map(|(id, w)| (id, *w))
    }

    pub fn ids(&self) -> Vec<WorkerId> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|(_, w)| *w).collect()
    }
}
