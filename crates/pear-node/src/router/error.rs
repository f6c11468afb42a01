//! Errors returned to peers.

use pear_acl::AclError;
use pear_auth::AuthError;
use pear_git::GitError;
use pear_p2p::P2pError;
use pear_types::TypeError;
use thiserror::Error;

/// A failed request. The `Display` text is what the peer receives.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Authorization refused.
    #[error("{0}")]
    Denied(&'static str),

    /// Authentication failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// Malformed request.
    #[error("{0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// git failed; carries what git printed.
    #[error("{0}")]
    Git(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("git timed out")]
    Timeout,
}

pub const NOT_ALLOWED: &str = "not allowed";
pub const NOT_ALLOWED_TO_PUSH: &str = "not allowed to push";
pub const NOT_ALLOWED_TO_PUSH_BRANCH: &str = "not allowed to push to this branch";
pub const NOT_ALLOWED_TO_ACCESS: &str = "not allowed to access this repo";

impl From<AclError> for RouterError {
    fn from(e: AclError) -> Self {
        match e {
            AclError::Validation(msg) => RouterError::Validation(msg),
            AclError::Storage(msg) => RouterError::Storage(msg),
        }
    }
}

impl From<TypeError> for RouterError {
    fn from(e: TypeError) -> Self {
        RouterError::Validation(e.to_string())
    }
}

impl From<GitError> for RouterError {
    fn from(e: GitError) -> Self {
        match e.stderr() {
            Some(stderr) if !stderr.is_empty() => RouterError::Git(stderr.to_string()),
            _ => RouterError::Git(e.to_string()),
        }
    }
}

impl From<P2pError> for RouterError {
    fn from(e: P2pError) -> Self {
        match e {
            P2pError::NotFound(what) => RouterError::NotFound(what),
            other => RouterError::Storage(other.to_string()),
        }
    }
}
