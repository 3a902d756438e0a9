//! Tagged failures returned by handler operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a handler failure, used by retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Deliberate failure requested by the payload (test/debug hook)
    Forced,
    /// Hash algorithm name not recognised
    UnsupportedAlgorithm,
    /// A required payload field is absent
    MissingField,
    /// Payload present but malformed
    InvalidInput,
    /// Expected to go away on its own (timeouts, unavailable peers)
    Transient,
    /// Anything else
    Internal,
}

impl FailureKind {
    pub const ALL: [FailureKind; 6] = [
        FailureKind::Forced,
        FailureKind::UnsupportedAlgorithm,
        FailureKind::MissingField,
        FailureKind::InvalidInput,
        FailureKind::Transient,
        FailureKind::Internal,
    ];
}

/// Failure of an `execute` or `compensate` call.
///
/// Retries propagate it unchanged; the engine stores `message` on the job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl HandlerFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn forced(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Forced, message)
    }

    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::new(FailureKind::UnsupportedAlgorithm, message)
    }

    pub fn missing_field(message: impl Into<String>) -> Self {
        Self::new(FailureKind::MissingField, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidInput, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }
}
