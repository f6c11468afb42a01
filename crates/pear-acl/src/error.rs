//! Error types for the ACL crate.

use thiserror::Error;

/// Errors that can occur in ACL operations.
#[derive(Debug, Error)]
pub enum AclError {
    /// Invalid input was provided (unknown role, bad visibility, bad name).
    #[error("{0}")]
    Validation(String),

    /// The ACL record could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for AclError {
    fn from(e: std::io::Error) -> Self {
        AclError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for AclError {
    fn from(e: serde_json::Error) -> Self {
        AclError::Storage(e.to_string())
    }
}

impl From<pear_types::TypeError> for AclError {
    fn from(e: pear_types::TypeError) -> Self {
        AclError::Validation(e.to_string())
    }
}

/// Result type for ACL operations.
pub type Result<T> = std::result::Result<T, AclError>;
