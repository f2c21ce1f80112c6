//! Error types used throughout the engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Offsync
///
/// Only failures a caller must act on surface as `OffsyncError`. Remote
/// failures are absorbed by the coordinator and recorded as queue state,
/// so `Remote` appears only at adapter boundaries (e.g. building a client).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum OffsyncError {
    /// The backing store could not durably apply a write. Fatal to the call
    /// that triggered it: the mutation was NOT captured.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OffsyncError {
    /// Whether the error came from the persisted queue store.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

impl From<serde_json::Error> for OffsyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for Offsync operations
pub type Result<T> = std::result::Result<T, OffsyncError>;

/// Failure class used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network timeout, 5xx-equivalent, throttling. Retried with backoff.
    Transient,
    /// Validation rejection, 4xx-equivalent, duplicate conflict. Never retried.
    Permanent,
}

crate::impl_domain_state_conversions!(ErrorClass {
    Transient => "transient",
    Permanent => "permanent",
});

/// Failure reported by the remote mutation API or a handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("transient remote failure: {0}")]
    Transient(String),

    #[error("permanent remote failure: {0}")]
    Permanent(String),
}

impl RemoteError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transient(_) => ErrorClass::Transient,
            Self::Permanent(_) => ErrorClass::Permanent,
        }
    }

    /// The failure reason without the class prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(message) | Self::Permanent(message) => message,
        }
    }
}
