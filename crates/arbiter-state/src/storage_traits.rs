//! Storage trait definitions for Arbiter
//!
//! The control loop owns the validator state in memory and hands the store a
//! full snapshot at the end of every round. Backends are async and
//! interchangeable; in-memory fakes live in [`crate::fakes`].

use async_trait::async_trait;

use crate::error::StateError;
use crate::schema::ValidatorState;

/// Result type for storage operations
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Durable home of the validator's reputation, blacklist and selection state.
///
/// Guarantees:
/// - `load_state` on a store that was never written returns `ValidatorState::default()`.
/// - `load_state` after `save_state(s)` returns a value equal to `s`.
/// - `save_state` replaces the previous snapshot entirely.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the last saved snapshot.
    async fn load_state(&self) -> StateResult<ValidatorState>;

    /// Replace the stored snapshot.
    async fn save_state(&self, state: &ValidatorState) -> StateResult<()>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}
