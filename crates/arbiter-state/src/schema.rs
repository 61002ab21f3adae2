//! Persisted record shapes.
//!
//! These are the tuples that must survive a restart. Behaviour that mutates
//! them (EMA updates, blacklist escalation, UCB bookkeeping) lives in
//! `arbiter-core`; this module only guarantees the shape and a few
//! read-only helpers.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a worker (hotkey, UID, or operator-assigned name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        WorkerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        WorkerId(s.to_string())
    }
}

/// Long-lived quality reputation of one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationRecord {
    pub worker_id: WorkerId,
    /// Exponentially smoothed quality, 0-100.
    pub ema_quality: f64,
    /// Most recent per-round totals, oldest first.
    pub history_window: VecDeque<f64>,
    pub last_updated_round: u64,
}

impl ReputationRecord {
    /// Mean of the history window, `None` when empty.
    pub fn history_mean(&self) -> Option<f64> {
        if self.history_window.is_empty() {
            None
        } else {
            Some(self.history_window.iter().sum::<f64>() / self.history_window.len() as f64)
        }
    }
}

/// Temporary exclusion of a worker that tripped the anti-cheat threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub worker_id: WorkerId,
    pub reason: String,
    pub expires_at: DateTime<Utc>,
}

impl BlacklistEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Counters behind upper-confidence-bound peer selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionCounters {
    pub total_rounds: u64,
    pub query_counts: BTreeMap<WorkerId, u64>,
}

impl SelectionCounters {
    pub fn query_count(&self, worker: &WorkerId) -> u64 {
        self.query_counts.get(worker).copied().unwrap_or(0)
    }
}

/// Weight vector whose ledger commit ran out of retries. Retried ahead of
/// the next fresh vector, including after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCommit {
    pub round: u64,
    pub worker_ids: Vec<WorkerId>,
    pub weights: Vec<f64>,
}

/// Everything the validator persists between rounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatorState {
    #[serde(default)]
    pub reputations: BTreeMap<WorkerId, ReputationRecord>,
    #[serde(default)]
    pub blacklist: BTreeMap<WorkerId, BlacklistEntry>,
    /// Violations accumulated since the worker's last blacklisting.
    #[serde(default)]
    pub violations: BTreeMap<WorkerId, u32>,
    #[serde(default)]
    pub selection: SelectionCounters,
    /// Last round whose results are reflected in this state.
    #[serde(default)]
    pub last_round: u64,
    #[serde(default)]
    pub last_committed_round: Option<u64>,
    #[serde(default)]
    pub pending_commit: Option<PendingCommit>,
}

impl ValidatorState {
    pub fn is_empty(&self) -> bool {
        self.reputations.is_empty()
            && self.blacklist.is_empty()
            && self.violations.is_empty()
            && self.selection.total_rounds == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_mean_of_empty_window_is_none() {
        let record = ReputationRecord {
            worker_id: WorkerId::new("w1"),
            ema_quality: 40.0,
            history_window: VecDeque::new(),
            last_updated_round: 1,
        };
        assert_eq!(record.history_mean(), None);
    }

    #[test]
    fn history_mean_averages_window() {
        let record = ReputationRecord {
            worker_id: WorkerId::new("w1"),
            ema_quality: 40.0,
            history_window: VecDeque::from(vec![20.0, 40.0, 90.0]),
            last_updated_round: 3,
        };
        assert_eq!(record.history_mean(), Some(50.0));
    }

    #[test]
    fn blacklist_entry_expires_at_boundary() {
        let now = Utc::now();
        let entry = BlacklistEntry {
            worker_id: WorkerId::new("w1"),
            reason: "cross_submission".into(),
            expires_at: now,
        };
        assert!(entry.is_expired(now));
        assert!(!entry.is_expired(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn worker_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&WorkerId::new("hotkey-7")).unwrap();
        assert_eq!(json, "\"hotkey-7\"");
    }

    #[test]
    fn older_documents_without_optional_tables_still_load() {
        let state: ValidatorState = serde_json::from_str(r#"{"last_round": 9}"#).unwrap();
        assert_eq!(state.last_round, 9);
        assert!(state.reputations.is_empty());
        assert_eq!(state.last_committed_round, None);
        assert_eq!(state.pending_commit, None);
    }
}
