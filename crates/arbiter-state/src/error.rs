//! Error types for arbiter-state

use thiserror::Error;

/// Errors that can occur in the state persistence layer
#[derive(Error, Debug)]
pub enum StateError {
    /// Backend connection error
    #[error("state backend connection failed: {0}")]
    Connection(String),

    /// Backend query error
    #[error("state query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("state serialization failed: {0}")]
    Serialization(String),

    /// Stored document is readable but violates the persisted schema
    #[error("corrupt state: {0}")]
    Corrupt(String),

    /// Filesystem error
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}
