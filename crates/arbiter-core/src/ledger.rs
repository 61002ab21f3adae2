//! Weight commits to the shared ledger.
//!
//! The ledger itself is an external collaborator behind [`LedgerCommitter`].
//! [`CommitScheduler`] decides when to commit, retries with exponential
//! backoff on a background task, and keeps at most one deferred vector when
//! retries run out.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arbiter_state::WorkerId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::LedgerConfig;
use crate::domain::WeightVector;
use crate::metrics::METRICS;
use crate::obs;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("ledger rejected commit {commit_id}: {reason}")]
    Rejected { commit_id: String, reason: String },

    #[error("ledger entry is corrupt: {0}")]
    Corrupt(String),

    #[error("ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One weight vector as submitted to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightCommit {
    pub round: u64,
    pub timestamp: DateTime<Utc>,
    pub worker_ids: Vec<WorkerId>,
    pub weights: Vec<f64>,
    /// SHA-256 over round, ids and weight bits. Independent of `timestamp`.
    pub commit_id: String,
}

impl WeightCommit {
    pub fn new(round: u64, weights: &WeightVector, timestamp: DateTime<Utc>) -> Self {
        let worker_ids = weights.ids();
        let values = weights.values();
        let commit_id = commit_id(round, &worker_ids, &values);
        Self {
            round,
            timestamp,
            worker_ids,
            weights: values,
            commit_id,
        }
    }

    /// Rebuild a commit from persisted parts. The id depends only on the
    /// round, ids and weights, so it matches the original.
    pub fn from_parts(
        round: u64,
        worker_ids: Vec<WorkerId>,
        weights: Vec<f64>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let commit_id = commit_id(round, &worker_ids, &weights);
        Self {
            round,
            timestamp,
            worker_ids,
            weights,
            commit_id,
        }
    }
}

fn commit_id(round: u64, ids: &[WorkerId], weights: &[f64]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(round.to_le_bytes());
    for id in ids {
        hasher.update(id.as_str().as_bytes());
        hasher.update([0u8]);
    }
    for w in weights {
        hasher.update(w.to_bits().to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Destination for weight commits.
#[async_trait]
pub trait LedgerCommitter: Send + Sync {
    async fn commit(&self, commit: &WeightCommit) -> Result<(), LedgerError>;

    fn name(&self) -> &'static str;
}

/// Keeps commits in memory. `failing(n)` rejects the first `n` attempts.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    commits: Mutex<Vec<WeightCommit>>,
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    /// Make the next `n` attempts fail.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn commits(&self) -> Vec<WeightCommit> {
        self.commits.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerCommitter for MemoryLedger {
    async fn commit(&self, commit: &WeightCommit) -> Result<(), LedgerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LedgerError::Unavailable("injected failure".into()));
        }
        let mut commits = self
            .commits
            .lock()
            .map_err(|_| LedgerError::Unavailable("memory ledger poisoned".into()))?;
        if !commits.iter().any(|c| c.commit_id == commit.commit_id) {
            commits.push(commit.clone());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Append-only JSON lines file. Re-submitting a known `commit_id` is a no-op.
#[derive(Debug)]
pub struct JsonlLedger {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All commits recorded so far, oldest first.
    pub async fn commits(&self) -> Result<Vec<WeightCommit>, LedgerError> {
        read_commits(&self.path).await
    }
}

async fn read_commits(path: &Path) -> Result<Vec<WeightCommit>, LedgerError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(n, line)| {
            serde_json::from_str(line)
                .map_err(|e| LedgerError::Corrupt(format!("{}:{}: {e}", path.display(), n + 1)))
        })
        .collect()
}

#[async_trait]
impl LedgerCommitter for JsonlLedger {
    async fn commit(&self, commit: &WeightCommit) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock().await;
        let existing = read_commits(&self.path).await?;
        if existing.iter().any(|c| c.commit_id == commit.commit_id) {
            debug!(commit_id = %commit.commit_id, "commit already recorded");
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(commit)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}

/// Retry budget for one commit attempt cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl From<&LedgerConfig> for RetryPolicy {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.backoff_initial_ms),
            max_backoff: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

/// Returns the number of attempts used, on success or failure.
async fn commit_with_retry(
    committer: &dyn LedgerCommitter,
    commit: &WeightCommit,
    policy: RetryPolicy,
) -> Result<u32, (u32, LedgerError)> {
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match committer.commit(commit).await {
            Ok(()) => return Ok(attempt),
            Err(e) if attempt > policy.max_retries => return Err((attempt, e)),
            Err(e) => {
                debug!(
                    round = commit.round,
                    attempt = attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "ledger commit failed, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Progress {
    deferred: Option<WeightCommit>,
    last_committed_round: Option<u64>,
}

/// Commits weight vectors on a fixed round cadence without blocking the
/// caller. Successive commits are chained so they land in round order.
pub struct CommitScheduler {
    committer: Arc<dyn LedgerCommitter>,
    policy: RetryPolicy,
    every_rounds: u64,
    progress: Arc<Mutex<Progress>>,
    in_flight: Option<JoinHandle<()>>,
}

impl CommitScheduler {
    pub fn new(committer: Arc<dyn LedgerCommitter>, config: &LedgerConfig) -> Self {
        Self {
            committer,
            policy: RetryPolicy::from(config),
            every_rounds: config.commit_every_rounds,
            progress: Arc::new(Mutex::new(Progress::default())),
            in_flight: None,
        }
    }

    /// Resume from a persisted high-water mark.
    pub fn with_last_committed(self, round: Option<u64>) -> Self {
        if let Ok(mut p) = self.progress.lock() {
            p.last_committed_round = round;
        }
        self
    }

    /// Resume with a vector that was still deferred at the last save.
    pub fn with_deferred(self, commit: Option<WeightCommit>) -> Self {
        if let Ok(mut p) = self.progress.lock() {
            p.deferred = commit;
        }
        self
    }

    pub fn sink(&self) -> &'static str {
        self.committer.name()
    }

    /// Whether `round` falls on the commit cadence.
    pub fn is_due(&self, round: u64) -> bool {
        self.every_rounds > 0 && round > 0 && round % self.every_rounds == 0
    }

    pub fn last_committed_round(&self) -> Option<u64> {
        self.progress.lock().ok().and_then(|p| p.last_committed_round)
    }

    pub fn deferred_round(&self) -> Option<u64> {
        self.progress
            .lock()
            .ok()
            .and_then(|p| p.deferred.as_ref().map(|c| c.round))
    }

    /// The vector awaiting a retry, if any. Stays visible while a retry is
    /// in flight so a concurrent save never loses it.
    pub fn deferred(&self) -> Option<WeightCommit> {
        self.progress.lock().ok().and_then(|p| p.deferred.clone())
    }

    /// Queue a commit of `weights` for `round` on a background task.
    /// Empty vectors are skipped.
    pub fn schedule(&mut self, round: u64, weights: &WeightVector) {
        if weights.is_empty() {
            debug!(round = round, "no weights to commit");
            return;
        }
        let fresh = WeightCommit::new(round, weights, Utc::now());
        let committer = Arc::clone(&self.committer);
        let progress = Arc::clone(&self.progress);
        let policy = self.policy;
        let previous = self.in_flight.take();

        self.in_flight = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    warn!(error = %e, "previous ledger commit task failed");
                }
            }
            let deferred = progress.lock().ok().and_then(|p| p.deferred.clone());

            if let Some(old) = deferred {
                match commit_with_retry(committer.as_ref(), &old, policy).await {
                    Ok(attempts) => record_success(&progress, &old, attempts),
                    Err((attempts, e)) => {
                        // Superseded by the fresh vector if that one lands.
                        obs::emit_ledger_deferred(old.round, attempts, &e);
                    }
                }
            }

            let outcome = commit_with_retry(committer.as_ref(), &fresh, policy).await;
            let still_deferred = match outcome {
                Ok(attempts) => {
                    record_success(&progress, &fresh, attempts);
                    None
                }
                Err((attempts, e)) => {
                    obs::emit_ledger_deferred(fresh.round, attempts, &e);
                    Some(fresh)
                }
            };
            if let Ok(mut p) = progress.lock() {
                p.deferred = still_deferred;
            }
        }));
    }

    /// Wait for any in-flight commit to finish.
    pub async fn flush(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "ledger commit task failed");
            }
        }
    }

    /// Commit `weights` immediately and wait for the outcome. Used on shutdown.
    pub async fn commit_now(&mut self, round: u64, weights: &WeightVector) {
        self.schedule(round, weights);
        self.flush().await;
    }
}

fn record_success(progress: &Mutex<Progress>, commit: &WeightCommit, attempts: u32) {
    METRICS.inc_commits();
    obs::emit_ledger_committed(commit.round, &commit.commit_id, commit.worker_ids.len(), attempts);
    if let Ok(mut p) = progress.lock() {
        p.last_committed_round = Some(p.last_committed_round.map_or(commit.round, |r| r.max(commit.round)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(pairs: &[(&str, f64)]) -> WeightVector {
        WeightVector::from_entries(
            pairs
                .iter()
                .map(|(id, w)| (WorkerId::new(*id), *w))
                .collect(),
        )
    }

    fn config(every: u64, retries: u32) -> LedgerConfig {
        LedgerConfig {
            commit_every_rounds: every,
            max_retries: retries,
            backoff_initial_ms: 500,
            backoff_max_ms: 2_000,
            ..LedgerConfig::default()
        }
    }

    #[test]
    fn commit_id_is_deterministic_and_ignores_timestamp() {
        let v = vector(&[("a", 0.4), ("b", 0.6)]);
        let c1 = WeightCommit::new(10, &v, Utc::now());
        let c2 = WeightCommit::new(10, &v, Utc::now() + chrono::Duration::hours(1));
        assert_eq!(c1.commit_id, c2.commit_id);
        assert_eq!(c1.commit_id.len(), 64);
        assert_ne!(c1.commit_id, WeightCommit::new(11, &v, Utc::now()).commit_id);
        assert_ne!(
            c1.commit_id,
            WeightCommit::new(10, &vector(&[("a", 0.5), ("b", 0.5)]), Utc::now()).commit_id
        );
    }

    #[test]
    fn cadence() {
        let s = CommitScheduler::new(Arc::new(MemoryLedger::new()), &config(100, 0));
        assert!(!s.is_due(0));
        assert!(!s.is_due(99));
        assert!(s.is_due(100));
        assert!(s.is_due(300));
        let never = CommitScheduler::new(Arc::new(MemoryLedger::new()), &config(0, 0));
        assert!(!never.is_due(100));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_backoff_then_succeeds() {
        let ledger = Arc::new(MemoryLedger::failing(2));
        let mut s = CommitScheduler::new(ledger.clone(), &config(1, 3));
        let started = tokio::time::Instant::now();
        s.schedule(1, &vector(&[("a", 1.0)]));
        s.flush().await;

        assert_eq!(ledger.attempts(), 3);
        assert_eq!(ledger.commits().len(), 1);
        assert_eq!(s.last_committed_round(), Some(1));
        // 500ms + 1000ms of backoff before the third attempt.
        assert_eq!(started.elapsed(), Duration::from_millis(1_500));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_capped() {
        let ledger = Arc::new(MemoryLedger::failing(4));
        let mut s = CommitScheduler::new(ledger.clone(), &config(1, 4));
        let started = tokio::time::Instant::now();
        s.schedule(1, &vector(&[("a", 1.0)]));
        s.flush().await;
        // 500 + 1000 + 2000 + 2000
        assert_eq!(started.elapsed(), Duration::from_millis(5_500));
        assert_eq!(ledger.commits().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_commit_is_deferred_and_retried_first() {
        let ledger = Arc::new(MemoryLedger::failing(3));
        let mut s = CommitScheduler::new(ledger.clone(), &config(100, 2));

        s.schedule(100, &vector(&[("a", 0.3), ("b", 0.7)]));
        s.flush().await;
        assert_eq!(ledger.attempts(), 3);
        assert!(ledger.commits().is_empty());
        assert_eq!(s.deferred_round(), Some(100));
        assert_eq!(s.last_committed_round(), None);

        s.schedule(200, &vector(&[("a", 0.5), ("b", 0.5)]));
        s.flush().await;
        let rounds: Vec<u64> = ledger.commits().iter().map(|c| c.round).collect();
        assert_eq!(rounds, vec![100, 200]);
        assert_eq!(s.deferred_round(), None);
        assert_eq!(s.last_committed_round(), Some(200));
    }

    #[tokio::test]
    async fn restored_deferred_vector_is_committed_before_the_next() {
        let original = WeightCommit::new(7, &vector(&[("a", 0.25), ("b", 0.75)]), Utc::now());
        let restored = WeightCommit::from_parts(
            original.round,
            original.worker_ids.clone(),
            original.weights.clone(),
            Utc::now(),
        );
        assert_eq!(restored.commit_id, original.commit_id);

        let ledger = Arc::new(MemoryLedger::new());
        let mut s = CommitScheduler::new(ledger.clone(), &config(1, 0))
            .with_last_committed(Some(5))
            .with_deferred(Some(restored));
        assert_eq!(s.deferred().map(|c| c.commit_id), Some(original.commit_id.clone()));

        s.schedule(8, &vector(&[("a", 0.5), ("b", 0.5)]));
        s.flush().await;
        let commits = ledger.commits();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].commit_id, original.commit_id);
        assert_eq!(commits[1].round, 8);
        assert_eq!(s.deferred(), None);
        assert_eq!(s.last_committed_round(), Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn successive_commits_land_in_order() {
        let ledger = Arc::new(MemoryLedger::failing(1));
        let mut s = CommitScheduler::new(ledger.clone(), &config(1, 1));
        s.schedule(1, &vector(&[("a", 1.0)]));
        s.schedule(2, &vector(&[("a", 1.0)]));
        s.schedule(3, &vector(&[("a", 1.0)]));
        s.flush().await;
        let rounds: Vec<u64> = ledger.commits().iter().map(|c| c.round).collect();
        assert_eq!(rounds, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_vectors_are_not_committed() {
        let ledger = Arc::new(MemoryLedger::new());
        let mut s = CommitScheduler::new(ledger.clone(), &config(1, 0));
        s.commit_now(5, &WeightVector::default()).await;
        assert_eq!(ledger.attempts(), 0);
    }

    #[tokio::test]
    async fn jsonl_ledger_appends_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JsonlLedger::new(dir.path().join("nested").join("ledger.jsonl"));
        let first = WeightCommit::new(100, &vector(&[("a", 0.25), ("b", 0.75)]), Utc::now());
        let second = WeightCommit::new(200, &vector(&[("a", 0.5), ("b", 0.5)]), Utc::now());

        ledger.commit(&first).await.unwrap();
        ledger.commit(&first).await.unwrap();
        ledger.commit(&second).await.unwrap();

        let stored = ledger.commits().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0], first);
        assert_eq!(stored[1].round, 200);
    }

    #[tokio::test]
    async fn jsonl_ledger_reports_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        tokio::fs::write(&path, "{not json}\n").await.unwrap();
        let ledger = JsonlLedger::new(&path);
        let err = ledger.commits().await.unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt(_)));
    }
}
