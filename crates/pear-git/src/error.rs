//! Git bridge error types.

use thiserror::Error;

/// Errors that can occur while driving git.
#[derive(Debug, Error)]
pub enum GitError {
    /// A git subprocess exited with a non-zero status.
    #[error("git {command} exited with code {code}: {stderr}")]
    Exit {
        /// Subcommand that failed, e.g. `ls-remote`.
        command: String,
        /// Exit code, or -1 when killed by a signal.
        code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// Invalid pkt-line format.
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    /// The peer git process broke the pack protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Git printed something that is not a valid object id or ref.
    #[error("unexpected git output: {0}")]
    Output(#[from] pear_types::TypeError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Captured stderr for process failures.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            GitError::Exit { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
