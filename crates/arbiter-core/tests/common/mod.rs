#![allow(dead_code)]

use std::sync::Arc;

use arbiter_core::{
    ArbiterConfig, ClientError, Collaborators, LedgerCommitter, StaticDirectory, TaskRequest,
    Validator, WorkerClient, WorkerInfo, WorkerReply,
};
use arbiter_state::{StateStore, WorkerId};
use async_trait::async_trait;
use serde_json::{json, Value};

pub enum Behavior {
    Reply(Value),
    Hang,
    Refuse,
}

/// Worker client driven by a per-call closure.
pub struct FnClient<F>(pub F);

#[async_trait]
impl<F> WorkerClient for FnClient<F>
where
    F: Fn(&WorkerInfo, &TaskRequest) -> Behavior + Send + Sync,
{
    async fn dispatch(
        &self,
        worker: &WorkerInfo,
        request: &TaskRequest,
    ) -> Result<WorkerReply, ClientError> {
        match (self.0)(worker, request) {
            Behavior::Reply(payload) => Ok(WorkerReply {
                payload,
                generation_time_secs: None,
                declared_mode: None,
            }),
            Behavior::Refuse => Err(ClientError::Status(503)),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Err(ClientError::Timeout)
            }
        }
    }
}

pub fn client<F>(f: F) -> FnClient<F>
where
    F: Fn(&WorkerInfo, &TaskRequest) -> Behavior + Send + Sync,
{
    FnClient(f)
}

pub fn worker(id: &str, stake: f64) -> WorkerInfo {
    WorkerInfo {
        id: WorkerId::new(id),
        endpoint: format!("http://{id}.invalid/task"),
        stake,
    }
}

/// Config that queries every worker each round with a fixed seed.
pub fn config(workers: Vec<WorkerInfo>) -> ArbiterConfig {
    let mut config = ArbiterConfig::default();
    config.round.sample_size = workers.len().max(1);
    config.round.seed = Some(42);
    config.workers = workers;
    config
}

pub async fn validator(
    config: ArbiterConfig,
    client: impl WorkerClient + 'static,
    ledger: Arc<dyn LedgerCommitter>,
    store: Arc<dyn StateStore>,
) -> Validator {
    Validator::new(
        config.clone(),
        Collaborators {
            directory: Arc::new(StaticDirectory::new(config.workers.clone())),
            client: Arc::new(client),
            ledger,
            store,
        },
    )
    .await
    .expect("validator should build")
}

pub fn blueprint_a() -> Value {
    json!({
        "title": "The Salt Cartographer",
        "genre": "literary fantasy",
        "setting": "A drowned archipelago where maps are inked on living coral. Cartographers trade charts for safe passage.",
        "core_conflict": "A young mapmaker discovers the guild has been erasing islands to hide a famine.",
        "themes": ["truth", "belonging", "sacrifice"],
        "tone": "melancholic",
        "target_audience": "adult"
    })
}

pub fn blueprint_b() -> Value {
    json!({
        "title": "Neon Orchard",
        "genre": "cyberpunk comedy",
        "setting": "Rooftop farms above Kowloon grow glowing pears. Drones quarrel over harvest rights every single evening.",
        "core_conflict": "Two rival gardeners must cooperate when a corporation patents sunlight itself.",
        "themes": ["greed", "friendship"],
        "tone": "playful",
        "target_audience": "young adult"
    })
}
