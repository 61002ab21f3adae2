//! Violation counting and temporary exclusion.

use std::collections::BTreeMap;
use std::time::Duration;

use arbiter_state::{BlacklistEntry, WorkerId};
use chrono::{DateTime, Utc};

/// Escalates repeated anti-cheat flags into a timed blacklist entry.
#[derive(Debug, Clone)]
pub struct BlacklistPolicy {
    pub violation_threshold: u32,
    pub duration: Duration,
}

impl BlacklistPolicy {
    pub fn new(violation_threshold: u32, duration: Duration) -> Self {
        Self {
            violation_threshold,
            duration,
        }
    }

    /// Count one violation. Returns the new entry when the threshold is hit;
    /// the counter resets at that point.
    pub fn record_violation(
        &self,
        violations: &mut BTreeMap<WorkerId, u32>,
        blacklist: &mut BTreeMap<WorkerId, BlacklistEntry>,
        worker: &WorkerId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Option<BlacklistEntry> {
        let count = violations.entry(worker.clone()).or_insert(0);
        *count += 1;
        if *count < self.violation_threshold {
            return None;
        }
        violations.remove(worker);

        let expires_at = chrono::Duration::from_std(self.duration)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let entry = BlacklistEntry {
            worker_id: worker.clone(),
            reason: reason.to_string(),
            expires_at,
        };
        blacklist.insert(worker.clone(), entry.clone());
        Some(entry)
    }
}

pub fn is_blacklisted(
    blacklist: &BTreeMap<WorkerId, BlacklistEntry>,
    worker: &WorkerId,
    now: DateTime<Utc>,
) -> bool {
    blacklist.get(worker).is_some_and(|e| !e.is_expired(now))
}

/// Drop expired entries, returning who was released.
pub fn purge_expired(
    blacklist: &mut BTreeMap<WorkerId, BlacklistEntry>,
    now: DateTime<Utc>,
) -> Vec<WorkerId> {
    let expired: Vec<WorkerId> = blacklist
        .values()
        .filter(|e| e.is_expired(now))
        .map(|e| e.worker_id.clone())
        .collect();
    for id in &expired {
        blacklist.remove(id);
    }
    expired
}
