//! P2P error types.

use thiserror::Error;

/// Errors that can occur during P2P operations.
#[derive(Debug, Error)]
pub enum P2pError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The peer failed the key handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A frame could not be decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The remote side answered a request with an error.
    #[error("{0}")]
    Remote(String),

    /// The connection closed before a response arrived.
    #[error("connection closed")]
    Closed,

    /// A request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The drive has no blob at the path.
    #[error("not found: {0}")]
    NotFound(String),

    /// An invalid secret key was supplied.
    #[error("invalid secret key")]
    InvalidSecretKey,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for P2P operations.
pub type Result<T> = std::result::Result<T, P2pError>;
