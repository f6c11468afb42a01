//! # pear-p2p
//!
//! Peer transport for gitpear.
//!
//! Connections are plain byte streams that start with a mutual key
//! handshake. After it, both sides exchange length-delimited RPC frames,
//! so either side can call the other. Pack files travel through drives,
//! key-addressed blob stores that a peer can read remotely.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod drive;
mod error;
mod handshake;
mod keypair;
mod message;
mod rpc;
mod transport;

pub use drive::{discovery_key, drive_key, BlobReader, Drive, FsDrive};
pub use error::{P2pError, Result};
pub use handshake::handshake;
pub use keypair::{verify, NodeKeypair};
pub use message::{Frame, MessageType, MAX_FRAME_LEN};
pub use rpc::{Responder, RpcPeer};
pub use transport::{accept, connect, PeerDirectory};

/// Default port the daemon listens on.
pub const DEFAULT_PORT: u16 = 9470;

/// Size of the chunks a remote drive is read in.
pub const DRIVE_CHUNK_SIZE: usize = 1024 * 1024;
