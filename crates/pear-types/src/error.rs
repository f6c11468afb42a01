//! Error types for shared gitpear types.

use thiserror::Error;

/// Errors raised while parsing or validating shared types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// The URL is not a valid `pear://<key>/<repo>` URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// A repository name failed validation.
    #[error("invalid repository name: {0}")]
    InvalidRepoName(String),

    /// A branch name failed validation.
    #[error("invalid branch name: {0}")]
    InvalidBranch(String),

    /// A string is not a 40 character hex object id.
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),
}

/// Result type for shared type operations.
pub type Result<T> = std::result::Result<T, TypeError>;
