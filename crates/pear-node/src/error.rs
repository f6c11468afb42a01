//! Daemon error types.

use thiserror::Error;

/// Errors raised by the daemon and the client session helpers.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Invalid or inconsistent configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Malformed request or argument.
    #[error("{0}")]
    Validation(String),

    /// Unknown repository or blob.
    #[error("not found: {0}")]
    NotFound(String),

    /// ACL store failure.
    #[error(transparent)]
    Acl(#[from] pear_acl::AclError),

    /// Authentication failure.
    #[error(transparent)]
    Auth(#[from] pear_auth::AuthError),

    /// git subprocess failure.
    #[error(transparent)]
    Git(#[from] pear_git::GitError),

    /// Transport failure.
    #[error(transparent)]
    P2p(#[from] pear_p2p::P2pError),

    /// Malformed URL, name or object id.
    #[error(transparent)]
    Type(#[from] pear_types::TypeError),

    /// Response payload could not be decoded.
    #[error("invalid response: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, NodeError>;
