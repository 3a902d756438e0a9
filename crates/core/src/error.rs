//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// These are the failures a submitter sees synchronously. Execution and
/// compensation failures never show up here; they are captured on the job
/// record instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A submission field was missing or malformed.
    #[error("{0}")]
    Validation(String),

    /// The job type tag has no registered handler.
    #[error("Unsupported job type: {0}")]
    UnsupportedJobType(String),

    /// Type-specific upfront payload validation failed.
    #[error("{0}")]
    InvalidPayload(String),

    /// A status change the state machine does not allow.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested job record does not exist.
    #[error("Job not found")]
    NotFound,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unsupported_job_type(tag: impl Into<String>) -> Self {
        Self::UnsupportedJobType(tag.into())
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
