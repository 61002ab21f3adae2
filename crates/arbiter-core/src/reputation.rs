//! Exponentially smoothed quality per worker.

use std::collections::{BTreeMap, VecDeque};

use arbiter_state::{ReputationRecord, WorkerId};

use crate::config::ReputationConfig;

#[derive(Debug, Clone)]
pub struct ReputationTracker {
    alpha: f64,
    window: usize,
}

impl ReputationTracker {
    pub fn new(config: &ReputationConfig) -> Self {
        Self {
            alpha: config.alpha,
            window: config.history_window,
        }
    }

    /// Fold one round's total into the worker's record.
    ///
    /// The first delivered response seeds `ema = total`. A worker that has
    /// never delivered anything gets no record, so repeated failures of an
    /// unknown worker leave no trace. Returns the updated record, if any.
    pub fn observe<'a>(
        &self,
        records: &'a mut BTreeMap<WorkerId, ReputationRecord>,
        worker: &WorkerId,
        total: f64,
        delivered: bool,
        round: u64,
    ) -> Option<&'a ReputationRecord> {
        let total = total.clamp(0.0, 100.0);
        if !records.contains_key(worker) {
            if !delivered {
                return None;
            }
            records.insert(
                worker.clone(),
                ReputationRecord {
                    worker_id: worker.clone(),
                    ema_quality: total,
                    history_window: VecDeque::from(vec![total]),
                    last_updated_round: round,
                },
            );
            return records.get(worker);
        }

        let record = records.get_mut(worker)?;
        record.ema_quality = self.alpha * total + (1.0 - self.alpha) * record.ema_quality;
        record.history_window.push_back(total);
        while record.history_window.len() > self.window {
            record.history_window.pop_front();
        }
        record.last_updated_round = round;
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ReputationTracker {
        ReputationTracker::new(&ReputationConfig::default())
    }

    #[test]
    fn first_response_seeds_ema_exactly() {
        let mut records = BTreeMap::new();
        let w = WorkerId::new("new");
        let r = tracker().observe(&mut records, &w, 73.25, true, 1).unwrap();
        assert_eq!(r.ema_quality, 73.25);
        assert_eq!(r.history_window, VecDeque::from(vec![73.25]));
    }

    #[test]
    fn ema_blends_with_alpha() {
        let mut records = BTreeMap::new();
        let w = WorkerId::new("w");
        let t = tracker();
        t.observe(&mut records, &w, 50.0, true, 1);
        let r = t.observe(&mut records, &w, 100.0, true, 2).unwrap();
        assert!((r.ema_quality - 55.0).abs() < 1e-12);
        assert_eq!(r.last_updated_round, 2);
    }

    #[test]
    fn failures_of_unknown_workers_create_nothing() {
        let mut records = BTreeMap::new();
        assert!(tracker()
            .observe(&mut records, &WorkerId::new("ghost"), 0.0, false, 1)
            .is_none());
        assert!(records.is_empty());
    }

    #[test]
    fn failures_of_known_workers_decay_toward_zero() {
        let mut records = BTreeMap::new();
        let w = WorkerId::new("w");
        let t = tracker();
        t.observe(&mut records, &w, 80.0, true, 1);
        let r = t.observe(&mut records, &w, 0.0, false, 2).unwrap();
        assert!((r.ema_quality - 72.0).abs() < 1e-12);
    }

    #[test]
    fn ema_stays_between_previous_and_new_total() {
        let mut records = BTreeMap::new();
        let w = WorkerId::new("w");
        let t = tracker();
        let mut prev = t.observe(&mut records, &w, 40.0, true, 0).unwrap().ema_quality;
        for (round, total) in [90.0, 3.0, 55.5, 100.0, 0.0, 41.0].into_iter().enumerate() {
            let ema = t
                .observe(&mut records, &w, total, true, round as u64 + 1)
                .unwrap()
                .ema_quality;
            let (lo, hi) = if prev <= total { (prev, total) } else { (total, prev) };
            assert!(lo <= ema && ema <= hi, "{ema} not in [{lo}, {hi}]");
            prev = ema;
        }
    }

    #[test]
    fn history_window_evicts_oldest() {
        let config = ReputationConfig {
            alpha: 0.1,
            history_window: 3,
        };
        let t = ReputationTracker::new(&config);
        let mut records = BTreeMap::new();
        let w = WorkerId::new("w");
        for total in [1.0, 2.0, 3.0, 4.0] {
            t.observe(&mut records, &w, total, true, 1);
        }
        assert_eq!(records[&w].history_window, VecDeque::from(vec![2.0, 3.0, 4.0]));
    }
}
