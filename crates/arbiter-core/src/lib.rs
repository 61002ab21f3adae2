//! Arbiter Core Library
//!
//! Scores untrusted worker submissions, detects collusion and template
//! reuse, tracks reputation, and turns it all into a normalized reward
//! weight vector committed to a ledger on a fixed cadence.

pub mod anticheat;
pub mod collector;
pub mod composite;
pub mod config;
pub mod directory;
pub mod domain;
pub mod engine;
pub mod ledger;
pub mod metrics;
pub mod obs;
pub mod reputation;
pub mod sampler;
pub mod scoring;
pub mod selector;
pub mod telemetry;
pub mod weights;

pub use anticheat::{AntiCheatDetector, FlagReason, PenaltyPolicy};
pub use collector::{ClientError, Collection, HttpWorkerClient, ResponseCollector, WorkerClient};
pub use composite::CompositeCalculator;
pub use config::{ArbiterConfig, ConfigError, LedgerSinkKind, StateBackend};
pub use directory::{StaticDirectory, WorkerDirectory};
pub use domain::{
    ArbiterError, CompositeScore, ExecutionMode, ResponseStatus, Result, ScoreBreakdown, Task,
    TaskRequest, TaskType, WeightVector, WorkerInfo, WorkerReply, WorkerResponse,
};
pub use engine::{Collaborators, RoundReport, RoundStats, Validator};
pub use ledger::{CommitScheduler, JsonlLedger, LedgerCommitter, LedgerError, MemoryLedger, WeightCommit};
pub use reputation::ReputationTracker;
pub use sampler::{TaskSampler, UpstreamCache};
pub use scoring::QualityScorer;
pub use selector::PeerSelector;
pub use weights::WeightNormalizer;
