//! Domain and handler error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic input failures (validation, identifiers).
/// Storage concerns belong to the store error types in `docket-infra`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. blank job type).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A status string did not name a known job status.
    #[error("unknown job status: {0}")]
    UnknownStatus(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// Failure returned by a job handler.
///
/// The worker records the `Display` text as the job's `error` and decides
/// between requeue and terminal failure from the attempt count alone; the
/// variant only shapes the message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The payload did not match the handler's schema.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// An external collaborator (blob store, notifier, sheet reader) failed.
    #[error("collaborator failed: {0}")]
    Collaborator(String),

    /// The handler gave up for a domain reason.
    #[error("{0}")]
    Failed(String),

    /// The handler panicked; the worker caught it.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    pub fn collaborator(msg: impl Into<String>) -> Self {
        Self::Collaborator(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}
