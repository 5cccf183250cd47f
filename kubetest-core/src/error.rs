//! Error types for domain validation and parsing

use thiserror::Error;

use crate::domain::workload::Phase;

/// Result type alias for domain operations
pub type Result<T> = std::result::Result<T, DomainError>;

/// Errors raised while parsing or validating domain values
#[derive(Debug, Error)]
pub enum DomainError {
    /// A job field is missing or malformed
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// Unrecognised job kind
    #[error("unknown job kind '{0}' (expected 'test' or 'benchmark')")]
    UnknownKind(String),

    /// Unrecognised image pull policy
    #[error("unknown image pull policy '{0}' (expected Always, IfNotPresent or Never)")]
    UnknownPullPolicy(String),

    /// A workload unit tried to move backwards through its lifecycle
    #[error("phase cannot move from {from} to {to}")]
    PhaseRegression { from: Phase, to: Phase },

    /// The job descriptor could not be encoded or decoded
    #[error("malformed job descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),
}
