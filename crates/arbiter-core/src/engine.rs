//! The round control loop.
//!
//! [`Validator`] owns every piece of mutable state (reputation, blacklist,
//! violation and selection counters, upstream cache) and drives discrete
//! rounds: sample, select, collect, score, penalize, update, normalize and,
//! on cadence, commit. Only worker dispatch and ledger commits leave the
//! process; both are behind traits so the loop can run fully in memory.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use arbiter_state::{PendingCommit, StateStore, ValidatorState, WorkerId};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::anticheat::blacklist::{self, BlacklistPolicy};
use crate::anticheat::{AntiCheatDetector, FlagReason};
use crate::collector::{ResponseCollector, WorkerClient};
use crate::composite::CompositeCalculator;
use crate::config::ArbiterConfig;
use crate::directory::WorkerDirectory;
use crate::domain::{
    ArbiterError, CompositeScore, ResponseStatus, Result, ScoreBreakdown, Task, TaskRequest,
    TaskType, WeightVector, WorkerInfo, WorkerResponse,
};
use crate::ledger::{CommitScheduler, LedgerCommitter, WeightCommit};
use crate::metrics::METRICS;
use crate::obs::{self, RoundSpan};
use crate::reputation::ReputationTracker;
use crate::sampler::{TaskSampler, UpstreamCache};
use crate::scoring::{text, QualityScorer};
use crate::selector::PeerSelector;
use crate::weights::WeightNormalizer;

/// External collaborators injected into a [`Validator`].
pub struct Collaborators {
    pub directory: Arc<dyn WorkerDirectory>,
    pub client: Arc<dyn WorkerClient>,
    pub ledger: Arc<dyn LedgerCommitter>,
    pub store: Arc<dyn StateStore>,
}

/// Outcome of one round.
#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub round: u64,
    pub task_type: TaskType,
    pub selected: Vec<WorkerId>,
    /// Final (post-penalty) breakdown per selected worker, in selection order.
    pub scores: Vec<(WorkerId, ScoreBreakdown)>,
    pub flagged: BTreeMap<WorkerId, FlagReason>,
    pub newly_blacklisted: Vec<WorkerId>,
    pub composites: Vec<CompositeScore>,
    pub weights: WeightVector,
    /// A ledger commit was scheduled at the end of this round.
    pub commit_scheduled: bool,
}

/// Running totals since process start.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoundStats {
    pub rounds: u64,
    pub responses: u64,
    pub successful: u64,
    score_sum: f64,
}

impl RoundStats {
    fn record(&mut self, scores: &[(WorkerId, ScoreBreakdown)], responses: &[WorkerResponse]) {
        self.rounds += 1;
        self.responses += responses.len() as u64;
        self.successful += responses
            .iter()
            .filter(|r| r.status == ResponseStatus::Ok)
            .count() as u64;
        self.score_sum += scores.iter().map(|(_, s)| s.total).sum::<f64>();
    }

    /// Mean total over every response, including failures.
    pub fn average_score(&self) -> f64 {
        if self.responses == 0 {
            0.0
        } else {
            self.score_sum / self.responses as f64
        }
    }
}

pub struct Validator {
    config: ArbiterConfig,
    directory: Arc<dyn WorkerDirectory>,
    store: Arc<dyn StateStore>,
    collector: ResponseCollector,
    scheduler: CommitScheduler,
    sampler: TaskSampler,
    selector: PeerSelector,
    scorer: QualityScorer,
    detector: AntiCheatDetector,
    blacklist: BlacklistPolicy,
    reputation: ReputationTracker,
    composite: CompositeCalculator,
    normalizer: WeightNormalizer,
    state: ValidatorState,
    upstream: UpstreamCache,
    rng: StdRng,
    stats: RoundStats,
    weights: WeightVector,
}

impl Validator {
    /// Validate `config`, restore persisted state and wire the components.
    pub async fn new(config: ArbiterConfig, parts: Collaborators) -> Result<Self> {
        config.validate()?;
        let state = parts.store.load_state().await?;
        info!(
            backend = parts.store.backend(),
            tracked_workers = state.reputations.len(),
            last_round = state.last_round,
            "validator state loaded"
        );

        let round = &config.round;
        let scheduler = CommitScheduler::new(parts.ledger, &config.ledger)
            .with_last_committed(state.last_committed_round)
            .with_deferred(state.pending_commit.clone().map(|p| {
                WeightCommit::from_parts(p.round, p.worker_ids, p.weights, Utc::now())
            }));
        let rng = match round.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            collector: ResponseCollector::new(parts.client, round.timeout(), round.max_in_flight),
            selector: PeerSelector::new(config.selection.exploration, round.sample_size),
            scorer: QualityScorer::new(
                config.scoring.clone(),
                config.rubrics.clone(),
                round.timeout(),
            ),
            sampler: TaskSampler::new(config.tasks.clone()),
            detector: AntiCheatDetector::new(&config.anticheat),
            blacklist: BlacklistPolicy::new(
                config.anticheat.violation_threshold,
                config.anticheat.blacklist_duration(),
            ),
            reputation: ReputationTracker::new(&config.reputation),
            composite: CompositeCalculator::new(config.composite.clone()),
            normalizer: WeightNormalizer::new(&config.weights),
            directory: parts.directory,
            store: parts.store,
            scheduler,
            state,
            upstream: UpstreamCache::default(),
            rng,
            stats: RoundStats::default(),
            weights: WeightVector::default(),
            config,
        })
    }

    pub fn state(&self) -> &ValidatorState {
        &self.state
    }

    /// Weights computed at the end of the latest round.
    pub fn current_weights(&self) -> &WeightVector {
        &self.weights
    }

    pub fn stats(&self) -> &RoundStats {
        &self.stats
    }

    pub fn last_committed_round(&self) -> Option<u64> {
        self.scheduler.last_committed_round()
    }

    /// Run one full round.
    ///
    /// Cancelling `shutdown` mid-collection discards the round: nothing is
    /// scored or saved, the selection counters are left untouched, and
    /// [`ArbiterError::Cancelled`] is returned.
    pub async fn run_round(&mut self, shutdown: &CancellationToken) -> Result<RoundReport> {
        let started = Instant::now();
        let round = self.state.last_round + 1;
        let now = Utc::now();

        for released in blacklist::purge_expired(&mut self.state.blacklist, now) {
            info!(round = round, worker_id = %released, "blacklist entry expired");
        }

        let workers = self.directory.workers().await?;
        let eligible: Vec<WorkerId> = workers
            .iter()
            .filter(|w| !blacklist::is_blacklisted(&self.state.blacklist, &w.id, now))
            .map(|w| w.id.clone())
            .collect();

        let task = self.sampler.sample(&self.upstream, &mut self.rng)?;
        let mut selection = self.state.selection.clone();
        let selected = self
            .selector
            .select(&eligible, &self.state.reputations, &mut selection);
        obs::emit_round_started(round, task.task_type, selected.len());

        let targets: Vec<WorkerInfo> = selected
            .iter()
            .filter_map(|id| workers.iter().find(|w| &w.id == id).cloned())
            .collect();
        let request = TaskRequest::new(round, &task);
        let collection = self.collector.collect(&request, &targets, shutdown).await;
        if collection.interrupted {
            let answered = collection.responses.iter().filter(|r| r.delivered()).count();
            obs::emit_round_cancelled(round, answered);
            return Err(ArbiterError::Cancelled);
        }
        let responses = collection.responses;
        self.state.selection = selection;

        let report = self.settle(round, &task, &workers, selected, &responses, now);
        self.stats.record(&report.scores, &responses);

        self.record_commit_progress();
        if let Err(e) = self.store.save_state(&self.state).await {
            obs::emit_state_save_failed(round, &e);
        }

        METRICS.inc_rounds();
        let delivered = responses.iter().filter(|r| r.delivered()).count();
        let mean_total = if report.scores.is_empty() {
            0.0
        } else {
            report.scores.iter().map(|(_, s)| s.total).sum::<f64>() / report.scores.len() as f64
        };
        obs::emit_round_finished(
            round,
            started.elapsed().as_millis() as u64,
            responses.len(),
            delivered,
            mean_total,
        );

        let every = self.config.round.stats_every_rounds;
        if every > 0 && round % every == 0 {
            self.log_stats(now);
        }
        Ok(report)
    }

    /// Copy the scheduler's ledger progress into the persisted state.
    fn record_commit_progress(&mut self) {
        self.state.last_committed_round = self.scheduler.last_committed_round();
        self.state.pending_commit = self.scheduler.deferred().map(|c| PendingCommit {
            round: c.round,
            worker_ids: c.worker_ids,
            weights: c.weights,
        });
    }

    /// Everything after collection. Synchronous: no await point may observe
    /// a half-updated state.
    fn settle(
        &mut self,
        round: u64,
        task: &Task,
        workers: &[WorkerInfo],
        selected: Vec<WorkerId>,
        responses: &[WorkerResponse],
        now: DateTime<Utc>,
    ) -> RoundReport {
        let _span = RoundSpan::enter(round);

        let mut scores: Vec<(WorkerId, ScoreBreakdown)> = responses
            .iter()
            .map(|r| {
                METRICS.inc_responses_scored();
                if r.status != ResponseStatus::Ok {
                    METRICS.inc_failures();
                }
                (r.worker_id.clone(), self.scorer.score(r, task))
            })
            .collect();

        let flagged = self.detector.inspect(responses);
        let mut newly_blacklisted = Vec::new();
        for (worker, score) in scores.iter_mut().map(|(w, s)| (&*w, s)) {
            let Some(reason) = flagged.get(worker) else {
                continue;
            };
            *score = self.config.anticheat.penalty.apply(score);
            METRICS.inc_violations();
            obs::emit_anticheat_flagged(worker, reason.label(), reason.similarity());
            if let Some(entry) = self.blacklist.record_violation(
                &mut self.state.violations,
                &mut self.state.blacklist,
                worker,
                reason.label(),
                now,
            ) {
                METRICS.inc_blacklistings();
                obs::emit_worker_blacklisted(worker, &entry.reason, &entry.expires_at);
                newly_blacklisted.push(worker.clone());
            }
        }

        for (response, (worker, score)) in responses.iter().zip(&scores) {
            obs::emit_worker_scored(
                worker,
                score,
                response.declared_mode,
                response.latency.as_millis() as u64,
            );
            self.reputation.observe(
                &mut self.state.reputations,
                worker,
                score.total,
                response.delivered(),
                round,
            );
        }

        self.offer_upstream(task.task_type, responses, &scores, &flagged);

        let entries = &self.state.blacklist;
        let composites = self.composite.compute(workers, &self.state.reputations, |id| {
            blacklist::is_blacklisted(entries, id, now)
        });
        let weights = self.normalizer.normalize(&composites);
        self.weights = weights.clone();
        self.state.last_round = round;

        let commit_scheduled = self.scheduler.is_due(round) && !weights.is_empty();
        if commit_scheduled {
            self.scheduler.schedule(round, &weights);
        }

        RoundReport {
            round,
            task_type: task.task_type,
            selected,
            scores,
            flagged,
            newly_blacklisted,
            composites,
            weights,
            commit_scheduled,
        }
    }

    /// Offer the round's best unflagged output to later stages.
    fn offer_upstream(
        &mut self,
        task_type: TaskType,
        responses: &[WorkerResponse],
        scores: &[(WorkerId, ScoreBreakdown)],
        flagged: &BTreeMap<WorkerId, FlagReason>,
    ) {
        let mut best: Option<(serde_json::Map<String, Value>, f64)> = None;
        for (response, (worker, score)) in responses.iter().zip(scores) {
            if flagged.contains_key(worker) {
                continue;
            }
            let Some(obj) = text::as_object(&response.payload) else {
                continue;
            };
            if best.as_ref().map_or(true, |(_, t)| score.total > *t) {
                best = Some((obj, score.total));
            }
        }
        if let Some((obj, total)) = best {
            self.sampler
                .record_output(&mut self.upstream, task_type, Value::Object(obj), total);
        }
    }

    fn log_stats(&self, now: DateTime<Utc>) {
        let blacklisted = self
            .state
            .blacklist
            .values()
            .filter(|e| !e.is_expired(now))
            .count();
        info!(
            event = "validator.stats",
            total_rounds = self.stats.rounds,
            responses = self.stats.responses,
            successful = self.stats.successful,
            average_score = self.stats.average_score(),
            blacklisted = blacklisted,
            tracked_workers = self.state.reputations.len(),
        );
        METRICS.flush();
    }

    /// Drive rounds on the configured interval until `shutdown` fires, then
    /// commit the latest weights and persist state.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.round.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.round.interval_secs,
            sample_size = self.config.round.sample_size,
            ledger = self.scheduler.sink(),
            "validator loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.run_round(&shutdown).await {
                Ok(report) => debug!(
                    round = report.round,
                    flagged = report.flagged.len(),
                    "round complete"
                ),
                Err(ArbiterError::Cancelled) => break,
                Err(e) => warn!(error = %e, "round skipped"),
            }
        }

        self.shutdown().await
    }

    /// Final commit of the latest weights (if newer than the last commit)
    /// and a last state save.
    pub async fn shutdown(&mut self) -> Result<()> {
        let round = self.state.last_round;
        self.scheduler.flush().await;
        let already_committed = self
            .scheduler
            .last_committed_round()
            .is_some_and(|r| r >= round);
        if !already_committed && !self.weights.is_empty() {
            self.scheduler.commit_now(round, &self.weights).await;
        }
        self.record_commit_progress();
        self.store.save_state(&self.state).await?;
        METRICS.flush();
        info!(
            round = round,
            last_committed_round = ?self.state.last_committed_round,
            pending_commit = ?self.state.pending_commit.as_ref().map(|p| p.round),
            "validator stopped"
        );
        Ok(())
    }
}
