//! Concurrent dispatch of a task to the sampled workers.
//!
//! One spawned task per worker, bounded by a semaphore, all sharing one
//! round-scoped cancellation token and one deadline. No retries inside a
//! round: whatever has not answered by the deadline is recorded as timed out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::domain::{TaskRequest, WorkerInfo, WorkerReply, WorkerResponse};

/// Errors from a single dispatch.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request timed out")]
    Timeout,

    #[error("worker returned HTTP {0}")]
    Status(u16),

    #[error("malformed reply ({} bytes)", body.len())]
    Malformed { body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

/// Transport used to reach a worker.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn dispatch(
        &self,
        worker: &WorkerInfo,
        request: &TaskRequest,
    ) -> Result<WorkerReply, ClientError>;
}

/// JSON over HTTP: POST the request to the worker's endpoint.
#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    http: reqwest::Client,
}

impl HttpWorkerClient {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("arbiter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;
        Ok(Self { http })
    }
}

fn classify(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout
    } else {
        ClientError::Transport(err.to_string())
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn dispatch(
        &self,
        worker: &WorkerInfo,
        request: &TaskRequest,
    ) -> Result<WorkerReply, ClientError> {
        let resp = self
            .http
            .post(&worker.endpoint)
            .json(request)
            .send()
            .await
            .map_err(classify)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }
        let body = resp.text().await.map_err(classify)?;
        serde_json::from_str(&body).map_err(|_| ClientError::Malformed { body })
    }
}

fn to_response(worker: &WorkerInfo, outcome: Result<WorkerReply, ClientError>, latency: Duration) -> WorkerResponse {
    let id = worker.id.clone();
    match outcome {
        Ok(reply) => WorkerResponse::ok(id, reply.payload, latency)
            .with_mode(reply.declared_mode.unwrap_or_default()),
        Err(ClientError::Malformed { body }) => WorkerResponse::malformed(id, body, latency),
        Err(ClientError::Timeout) => WorkerResponse::timed_out(id, latency),
        Err(e) => WorkerResponse::failed(id, e.to_string(), latency),
    }
}

/// Responses of one round, in worker order.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub responses: Vec<WorkerResponse>,
    /// The caller's shutdown token had fired by the time collection ended.
    /// Distinct from the round deadline, which is a normal outcome.
    pub interrupted: bool,
}

pub struct ResponseCollector {
    client: Arc<dyn WorkerClient>,
    timeout: Duration,
    max_in_flight: usize,
}

impl ResponseCollector {
    pub fn new(client: Arc<dyn WorkerClient>, timeout: Duration, max_in_flight: usize) -> Self {
        Self {
            client,
            timeout,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Dispatch `request` to every worker and gather one response each, in
    /// the order of `workers`. Cancelling `shutdown` ends the round early
    /// and marks the collection as interrupted.
    #[instrument(skip_all, fields(round = request.round, workers = workers.len()))]
    pub async fn collect(
        &self,
        request: &TaskRequest,
        workers: &[WorkerInfo],
        shutdown: &CancellationToken,
    ) -> Collection {
        let round_token = shutdown.child_token();
        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let request = Arc::new(request.clone());
        let round_started = Instant::now();
        let deadline = round_started + self.timeout;

        let mut join_set = JoinSet::new();
        for (idx, worker) in workers.iter().cloned().enumerate() {
            let client = Arc::clone(&self.client);
            let permits = Arc::clone(&permits);
            let request = Arc::clone(&request);
            let token = round_token.clone();
            join_set.spawn(async move {
                let _permit = tokio::select! {
                    permit = permits.acquire_owned() => permit.ok(),
                    _ = token.cancelled() => {
                        return (idx, WorkerResponse::timed_out(worker.id.clone(), round_started.elapsed()));
                    }
                };
                let started = Instant::now();
                let outcome = tokio::select! {
                    outcome = client.dispatch(&worker, &request) => outcome,
                    _ = token.cancelled() => Err(ClientError::Timeout),
                };
                (idx, to_response(&worker, outcome, started.elapsed()))
            });
        }

        let mut slots: Vec<Option<WorkerResponse>> = vec![None; workers.len()];
        let drained = tokio::time::timeout_at(deadline, async {
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((idx, response)) => slots[idx] = Some(response),
                    Err(e) => warn!(error = %e, "worker dispatch task failed"),
                }
            }
        })
        .await;

        let timed_out = drained.is_err();
        if timed_out {
            round_token.cancel();
            join_set.shutdown().await;
            debug!("round deadline reached, stragglers cancelled");
        }

        let interrupted = shutdown.is_cancelled();
        let responses = workers
            .iter()
            .zip(slots)
            .map(|(worker, slot)| match slot {
                Some(response) => response,
                None if timed_out => WorkerResponse::timed_out(worker.id.clone(), self.timeout),
                None => WorkerResponse::failed(
                    worker.id.clone(),
                    "dispatch task aborted",
                    round_started.elapsed(),
                ),
            })
            .collect();
        Collection {
            responses,
            interrupted,
        }
    }
}
