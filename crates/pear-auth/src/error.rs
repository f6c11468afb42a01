//! Error types for request authentication.

use thiserror::Error;

/// Errors raised while authenticating a request or signing one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The request carries no usable credential.
    #[error("not allowed")]
    NotAllowed,

    /// The signed event failed verification.
    #[error("invalid event")]
    InvalidEvent(String),

    /// The local configuration does not allow signing.
    #[error("config error: {0}")]
    Config(String),
}

impl AuthError {
    /// Detail hidden from peers but useful in logs.
    pub fn detail(&self) -> &str {
        match self {
            AuthError::InvalidEvent(reason) => reason,
            AuthError::Config(reason) => reason,
            AuthError::NotAllowed => "missing header",
        }
    }
}

/// Result type for auth operations.
pub type Result<T> = std::result::Result<T, AuthError>;
