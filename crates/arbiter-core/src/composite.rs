//! Blend of stake, smoothed quality and historical quality.

use std::collections::BTreeMap;

use arbiter_state::{ReputationRecord, WorkerId};

use crate::config::CompositeConfig;
use crate::domain::{CompositeScore, WorkerInfo};

#[derive(Debug, Clone)]
pub struct CompositeCalculator {
    weights: CompositeConfig,
}

impl CompositeCalculator {
    pub fn new(weights: CompositeConfig) -> Self {
        Self { weights }
    }

    /// Score every registered worker.
    ///
    /// `max_stake` is taken over eligible workers only. Blacklisted workers
    /// are reported with composite 0 and `eligible = false`. A worker with no
    /// reputation record has zero quality and history.
    pub fn compute(
        &self,
        workers: &[WorkerInfo],
        reputations: &BTreeMap<WorkerId, ReputationRecord>,
        is_blacklisted: impl Fn(&WorkerId) -> bool,
    ) -> Vec<CompositeScore> {
        let max_stake = workers
            .iter()
            .filter(|w| !is_blacklisted(&w.id))
            .map(|w| w.stake)
            .fold(0.0_f64, f64::max);

        workers
            .iter()
            .map(|w| {
                if is_blacklisted(&w.id) {
                    return CompositeScore {
                        worker_id: w.id.clone(),
                        stake_weight: 0.0,
                        quality_component: 0.0,
                        history_component: 0.0,
                        composite: 0.0,
                        eligible: false,
                    };
                }
                let stake_weight = if max_stake > 0.0 {
                    (w.stake / max_stake).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let (ema, history) = reputations
                    .get(&w.id)
                    .map(|r| (r.ema_quality, r.history_mean().unwrap_or(r.ema_quality)))
                    .unwrap_or((0.0, 0.0));
                let quality_component = (ema / 100.0).clamp(0.0, 1.0);
                let history_component = (history / 100.0).clamp(0.0, 1.0);
                let composite = (self.weights.stake * stake_weight
                    + self.weights.quality * quality_component
                    + self.weights.history * history_component)
                    .clamp(0.0, 1.0);
                CompositeScore {
                    worker_id: w.id.clone(),
                    stake_weight,
                    quality_component,
                    history_component,
                    composite,
                    eligible: true,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn worker(id: &str, stake: f64) -> WorkerInfo {
        WorkerInfo {
            id: WorkerId::new(id),
            endpoint: format!("http://{id}"),
            stake,
        }
    }

    fn record(id: &str, ema: f64, window: Vec<f64>) -> (WorkerId, ReputationRecord) {
        (
            WorkerId::new(id),
            ReputationRecord {
                worker_id: WorkerId::new(id),
                ema_quality: ema,
                history_window: VecDeque::from(window),
                last_updated_round: 1,
            },
        )
    }

    #[test]
    fn formula_with_default_weights() {
        let calc = CompositeCalculator::new(CompositeConfig::default());
        let workers = [worker("a", 100.0), worker("b", 50.0)];
        let reps = BTreeMap::from([record("a", 80.0, vec![60.0]), record("b", 40.0, vec![])]);
        let scores = calc.compute(&workers, &reps, |_| false);

        assert!((scores[0].composite - (0.15 + 0.75 * 0.8 + 0.10 * 0.6)).abs() < 1e-12);
        // empty window falls back to ema
        assert_eq!(scores[1].history_component, 0.4);
        assert!((scores[1].composite - (0.15 * 0.5 + 0.75 * 0.4 + 0.10 * 0.4)).abs() < 1e-12);
    }

    #[test]
    fn blacklisted_worker_is_zero_and_excluded_from_max_stake() {
        let calc = CompositeCalculator::new(CompositeConfig::default());
        let workers = [worker("whale", 1000.0), worker("b", 10.0)];
        let reps = BTreeMap::from([record("whale", 100.0, vec![100.0])]);
        let banned = WorkerId::new("whale");
        let scores = calc.compute(&workers, &reps, |w| *w == banned);

        assert_eq!(scores[0].composite, 0.0);
        assert!(!scores[0].eligible);
        assert_eq!(scores[1].stake_weight, 1.0);
    }

    #[test]
    fn zero_stake_everywhere_is_not_a_division_by_zero() {
        let calc = CompositeCalculator::new(CompositeConfig::default());
        let scores = calc.compute(&[worker("a", 0.0)], &BTreeMap::new(), |_| false);
        assert_eq!(scores[0].stake_weight, 0.0);
        assert_eq!(scores[0].composite, 0.0);
    }
}
