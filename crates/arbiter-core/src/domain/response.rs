//! Workers and what they send back.

use std::time::Duration;

use arbiter_state::WorkerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A worker as published by the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    /// Base URL the task request is POSTed to.
    pub endpoint: String,
    /// Collateral the worker has bonded. Non-negative.
    #[serde(default)]
    pub stake: f64,
}

/// How the worker claims it produced the output. Logged, never scored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Local,
    Api,
    Custom,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Transport-level outcome of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Malformed,
    TimedOut,
    Failed(String),
}

/// Body a worker returns for a [`crate::TaskRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub payload: Value,
    #[serde(default)]
    pub generation_time_secs: Option<f64>,
    #[serde(default)]
    pub declared_mode: Option<ExecutionMode>,
}

/// One worker's answer in one round, whatever happened on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerResponse {
    pub worker_id: WorkerId,
    pub payload: Value,
    /// Measured round trip.
    pub latency: Duration,
    pub declared_mode: ExecutionMode,
    pub status: ResponseStatus,
}

impl WorkerResponse {
    pub fn ok(worker_id: WorkerId, payload: Value, latency: Duration) -> Self {
        Self {
            worker_id,
            payload,
            latency,
            declared_mode: ExecutionMode::Unknown,
            status: ResponseStatus::Ok,
        }
    }

    pub fn malformed(worker_id: WorkerId, body: String, latency: Duration) -> Self {
        Self {
            worker_id,
            payload: Value::String(body),
            latency,
            declared_mode: ExecutionMode::Unknown,
            status: ResponseStatus::Malformed,
        }
    }

    pub fn timed_out(worker_id: WorkerId, latency: Duration) -> Self {
        Self {
            worker_id,
            payload: Value::Null,
            latency,
            declared_mode: ExecutionMode::Unknown,
            status: ResponseStatus::TimedOut,
        }
    }

    pub fn failed(worker_id: WorkerId, reason: impl Into<String>, latency: Duration) -> Self {
        Self {
            worker_id,
            payload: Value::Null,
            latency,
            declared_mode: ExecutionMode::Unknown,
            status: ResponseStatus::Failed(reason.into()),
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.declared_mode = mode;
        self
    }

    /// Whether anything at all came back.
    pub fn delivered(&self) -> bool {
        !self.payload.is_null()
    }
}
