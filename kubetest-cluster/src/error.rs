//! Error types for cluster backends

use thiserror::Error;

/// Result type alias for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors that can occur when talking to a cluster backend
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The object being created is already there
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// Resource not found
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// Platform API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Could not reach the platform at all
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A backend command exited unsuccessfully
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Failed to parse a platform response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClusterError {
    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is an "already exists" conflict
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists { .. } | Self::ApiError { status: 409, .. }
        )
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. }) || matches!(self, Self::ApiError { status: 404, .. })
    }
}
