//! Git process bridge for gitpear.
//!
//! All object-level work is delegated to the installed `git` binary. This
//! crate owns process lifecycle and protocol framing only: the pkt-line
//! codec, the upload-pack negotiation state machine, and thin wrappers
//! around the git commands the daemon, CLI and remote helper need.

mod bridge;
mod error;
mod negotiate;
mod pktline;

pub use bridge::{parse_ls_remote, GitBridge, UploadPack};
pub use error::GitError;
pub use negotiate::{Negotiation, NegotiationState};
pub use pktline::{PktLine, PktLineReader, PktLineWriter, MAX_PKT_DATA, MAX_PKT_LEN};

/// Result type for git bridge operations.
pub type Result<T> = std::result::Result<T, GitError>;
