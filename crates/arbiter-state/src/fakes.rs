//! In-memory fakes for storage traits
//!
//! `MemoryStateStore` satisfies the [`StateStore`] contract without touching
//! disk. Used by tests and by `arbiter run --dry-run`.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StateError;
use crate::schema::ValidatorState;
use crate::storage_traits::{StateResult, StateStore};

/// In-memory state store holding the last saved snapshot.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<ValidatorState>>,
    saves: Mutex<u64>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot.
    pub fn with_state(state: ValidatorState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: Mutex::new(0),
        }
    }

    /// Number of `save_state` calls observed.
    pub fn save_count(&self) -> u64 {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_state(&self) -> StateResult<ValidatorState> {
        let state = self
            .state
            .lock()
            .map_err(|e| StateError::Query(format!("poisoned lock: {e}")))?;
        Ok(state.clone().unwrap_or_default())
    }

    async fn save_state(&self, state: &ValidatorState) -> StateResult<()> {
        let mut slot = self
            .state
            .lock()
            .map_err(|e| StateError::Query(format!("poisoned lock: {e}")))?;
        *slot = Some(state.clone());
        if let Ok(mut n) = self.saves.lock() {
            *n += 1;
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
