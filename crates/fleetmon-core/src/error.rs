//! Error types for Fleetmon.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Not-found conditions: expected, distinguished from storage faults
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    // Agent fetch errors: network, timeout, and non-2xx all collapse here.
    // Never retried within a cycle; the next scheduled cycle is the retry.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Invalid agent URL: {0}")]
    InvalidUrl(String),

    // Infrastructure errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
