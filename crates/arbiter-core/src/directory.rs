//! Where the set of known workers comes from.

use async_trait::async_trait;

use crate::domain::{Result, WorkerInfo};

/// Source of the current worker population, queried once per round.
#[async_trait]
pub trait WorkerDirectory: Send + Sync {
    async fn workers(&self) -> Result<Vec<WorkerInfo>>;
}

/// Fixed worker list, usually the `[[workers]]` tables of the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    workers: Vec<WorkerInfo>,
}

impl StaticDirectory {
    pub fn new(workers: Vec<WorkerInfo>) -> Self {
        Self { workers }
    }
}

#[async_trait]
impl WorkerDirectory for StaticDirectory {
    async fn workers(&self) -> Result<Vec<WorkerInfo>> {
        Ok(self.workers.clone())
    }
}
