//! Structured lifecycle events for validator rounds.
//!
//! Every event is an `info!` (or `warn!`) carrying an `event` field, so log
//! pipelines can filter on it regardless of the output format chosen in
//! [`crate::telemetry::init_tracing`].

use tracing::{info, warn};

use arbiter_state::WorkerId;

use crate::domain::{ExecutionMode, ScoreBreakdown, TaskType};

/// RAII guard that enters a round-scoped span.
///
/// ```ignore
/// let _span = RoundSpan::enter(42);
/// // everything logged here carries round = 42
/// ```
pub struct RoundSpan {
    _span: tracing::span::EnteredSpan,
}

impl RoundSpan {
    pub fn enter(round: u64) -> Self {
        let span = tracing::info_span!("arbiter.round", round = round);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_round_started(round: u64, task_type: TaskType, selected: usize) {
    info!(
        event = "round.started",
        round = round,
        task_type = %task_type,
        selected = selected,
    );
}

/// Emit event: round finished with its response tally and mean score.
pub fn emit_round_finished(round: u64, duration_ms: u64, responses: usize, delivered: usize, mean_total: f64) {
    info!(
        event = "round.finished",
        round = round,
        duration_ms = duration_ms,
        responses = responses,
        delivered = delivered,
        mean_total = mean_total,
    );
}

/// Emit event: round abandoned because shutdown fired during collection.
pub fn emit_round_cancelled(round: u64, received: usize) {
    warn!(event = "round.cancelled", round = round, received = received);
}

pub fn emit_worker_scored(worker_id: &WorkerId, score: &ScoreBreakdown, mode: ExecutionMode, latency_ms: u64) {
    info!(
        event = "worker.scored",
        worker_id = %worker_id,
        technical = score.technical,
        structure = score.structure,
        content = score.content,
        total = score.total,
        declared_mode = ?mode,
        latency_ms = latency_ms,
    );
}

pub fn emit_anticheat_flagged(worker_id: &WorkerId, reason: &str, similarity: f64) {
    warn!(
        event = "anticheat.flagged",
        worker_id = %worker_id,
        reason = %reason,
        similarity = similarity,
    );
}

pub fn emit_worker_blacklisted(worker_id: &WorkerId, reason: &str, expires_at: &chrono::DateTime<chrono::Utc>) {
    warn!(
        event = "worker.blacklisted",
        worker_id = %worker_id,
        reason = %reason,
        expires_at = %expires_at.to_rfc3339(),
    );
}

pub fn emit_ledger_committed(round: u64, commit_id: &str, workers: usize, attempts: u32) {
    info!(
        event = "ledger.committed",
        round = round,
        commit_id = %commit_id,
        workers = workers,
        attempts = attempts,
    );
}

/// Emit event: commit exhausted its retries and waits for the next cadence.
pub fn emit_ledger_deferred(round: u64, attempts: u32, error: &dyn std::fmt::Display) {
    warn!(
        event = "ledger.deferred",
        round = round,
        attempts = attempts,
        error = %error,
    );
}

pub fn emit_state_save_failed(round: u64, error: &dyn std::fmt::Display) {
    warn!(event = "state.save_failed", round = round, error = %error);
}
