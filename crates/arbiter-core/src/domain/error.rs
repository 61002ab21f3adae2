//! Error taxonomy for the Arbiter engine.

use arbiter_state::StateError;

use crate::collector::ClientError;
use crate::config::ConfigError;
use crate::ledger::LedgerError;

/// Top-level engine errors.
#[derive(Debug, thiserror::Error)]
pub enum ArbiterError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("worker client error: {0}")]
    Client(#[from] ClientError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("worker directory unavailable: {0}")]
    Directory(String),

    #[error("round cancelled by shutdown before collection finished")]
    Cancelled,

    #[error("no task type can be dispatched with the current upstream context")]
    NoDispatchableTask,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ArbiterError>;
