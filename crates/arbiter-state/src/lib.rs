//! Arbiter-State: persistence for the Arbiter incentive engine
//!
//! Reputation records, the anti-cheat blacklist, violation counters and the
//! peer-selection counters must survive process restarts. This crate owns
//! their persisted shape and the backends that store them.
//!
//! ## Key Components
//!
//! - `StateStore`: backend-agnostic async load/save of a [`ValidatorState`]
//! - `MemoryStateStore`: in-memory fake for tests and dry runs
//! - `FileStateStore`: single JSON document written atomically
//! - `SurrealStateStore`: SurrealDB tables (in-memory, surrealkv, or remote)

mod error;
pub mod fakes;
mod file_store;
mod schema;
pub mod storage_traits;
mod surreal_store;

pub use error::StateError;
pub use fakes::MemoryStateStore;
pub use file_store::FileStateStore;
pub use schema::{
    BlacklistEntry, PendingCommit, ReputationRecord, SelectionCounters, ValidatorState, WorkerId,
};
pub use storage_traits::{StateResult, StateStore};
pub use surreal_store::{SurrealConfig, SurrealStateStore};

/// Result type for arbiter-state operations
pub type Result<T> = std::result::Result<T, StateError>;
