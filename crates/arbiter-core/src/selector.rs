//! Upper-confidence-bound peer selection.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use arbiter_state::{ReputationRecord, SelectionCounters, WorkerId};

#[derive(Debug, Clone)]
pub struct PeerSelector {
    exploration: f64,
    sample_size: usize,
}

impl PeerSelector {
    pub fn new(exploration: f64, sample_size: usize) -> Self {
        Self {
            exploration,
            sample_size,
        }
    }

    /// `reputation/100 + c * sqrt(2 ln(total_rounds) / query_count)`.
    /// Never-queried workers score +inf.
    pub fn ucb(&self, reputation: f64, query_count: u64, total_rounds: u64) -> f64 {
        if query_count == 0 {
            return f64::INFINITY;
        }
        let rounds = total_rounds.max(1) as f64;
        reputation / 100.0 + self.exploration * (2.0 * rounds.ln() / query_count as f64).sqrt()
    }

    /// Pick the top `sample_size` eligible workers and bump their counters.
    ///
    /// Ties break on worker id, so identical counters give identical picks.
    pub fn select(
        &self,
        eligible: &[WorkerId],
        reputations: &BTreeMap<WorkerId, ReputationRecord>,
        counters: &mut SelectionCounters,
    ) -> Vec<WorkerId> {
        let mut ranked: Vec<(f64, &WorkerId)> = eligible
            .iter()
            .map(|id| {
                let reputation = reputations.get(id).map_or(0.0, |r| r.ema_quality);
                let score = self.ucb(reputation, counters.query_count(id), counters.total_rounds);
                (score, id)
            })
            .collect();
        ranked.sort_by(|(sa, ia), (sb, ib)| {
            sb.partial_cmp(sa).unwrap_or(Ordering::Equal).then_with(|| ia.cmp(ib))
        });

        let selected: Vec<WorkerId> = ranked
            .into_iter()
            .take(self.sample_size)
            .map(|(_, id)| id.clone())
            .collect();

        counters.total_rounds += 1;
        for id in &selected {
            *counters.query_counts.entry(id.clone()).or_insert(0) += 1;
        }
        selected
    }
}
