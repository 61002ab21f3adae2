//! Global atomic counters for the validator.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event, which the engine does with every stats report.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    rounds: AtomicU64,
    responses_scored: AtomicU64,
    failures: AtomicU64,
    violations: AtomicU64,
    blacklistings: AtomicU64,
    commits: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            rounds: AtomicU64::new(0),
            responses_scored: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            violations: AtomicU64::new(0),
            blacklistings: AtomicU64::new(0),
            commits: AtomicU64::new(0),
        }
    }

    pub fn inc_rounds(&self) {
        self.rounds.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rounds", "counter incremented");
    }

    pub fn inc_responses_scored(&self) {
        self.responses_scored.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "responses_scored", "counter incremented");
    }

    /// Timeouts, transport errors and malformed bodies.
    pub fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "failures", "counter incremented");
    }

    pub fn inc_violations(&self) {
        self.violations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "violations", "counter incremented");
    }

    pub fn inc_blacklistings(&self) {
        self.blacklistings.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "blacklistings", "counter incremented");
    }

    pub fn inc_commits(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "commits", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            rounds = self.rounds(),
            responses_scored = self.responses_scored(),
            failures = self.failures(),
            violations = self.violations(),
            blacklistings = self.blacklistings(),
            commits = self.commits(),
        );
    }

    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    pub fn responses_scored(&self) -> u64 {
        self.responses_scored.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    pub fn blacklistings(&self) -> u64 {
        self.blacklistings.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }
}
