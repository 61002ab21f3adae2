//! Domain models for Arbiter.
//!
//! - `Task`, `TaskType`, `TaskRequest`: what gets dispatched
//! - `WorkerInfo`, `WorkerResponse`, `WorkerReply`: who answers and how
//! - `ScoreBreakdown`, `CompositeScore`, `WeightVector`: what the answers are worth

pub mod error;
pub mod response;
pub mod score;
pub mod task;

pub use error::{ArbiterError, Result};
pub use response::{ExecutionMode, ResponseStatus, WorkerInfo, WorkerReply, WorkerResponse};
pub use score::{
    CompositeScore, ScoreBreakdown, WeightVector, CONTENT_MAX, STRUCTURE_MAX, TECHNICAL_MAX,
};
pub use task::{Task, TaskRequest, TaskType};
