//! Resolving peer keys to addresses and opening authenticated connections.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;

use crate::handshake::handshake;
use crate::keypair::NodeKeypair;
use crate::rpc::{Responder, RpcPeer};
use crate::{P2pError, Result};

/// Known peers, by hex public key.
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    peers: HashMap<String, SocketAddr>,
}

impl PeerDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the address of `key`.
    pub fn insert(&mut self, key: impl Into<String>, addr: SocketAddr) {
        self.peers.insert(key.into().to_ascii_lowercase(), addr);
    }

    /// Address of `key`, if known.
    pub fn resolve(&self, key: &str) -> Result<SocketAddr> {
        self.peers
            .get(&key.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| P2pError::NotFound(format!("no address known for peer {}", key)))
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peers are known.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl FromIterator<(String, SocketAddr)> for PeerDirectory {
    fn from_iter<I: IntoIterator<Item = (String, SocketAddr)>>(iter: I) -> Self {
        let mut directory = Self::new();
        for (key, addr) in iter {
            directory.insert(key, addr);
        }
        directory
    }
}

/// Dials `addr`, runs the handshake and starts an RPC session.
///
/// The connection is refused unless the peer proves ownership of `expected`.
pub async fn connect(
    addr: SocketAddr,
    keypair: &NodeKeypair,
    expected: &[u8; 32],
    responder: Option<Arc<dyn Responder>>,
) -> Result<RpcPeer> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| P2pError::Connection(format!("{}: {}", addr, e)))?;
    stream.set_nodelay(true)?;
    let remote_key = handshake(&mut stream, keypair, Some(expected)).await?;
    tracing::debug!(%addr, "connected");
    Ok(RpcPeer::spawn(stream, remote_key, responder))
}

/// Runs the handshake on an accepted stream and starts an RPC session.
///
/// `bind` picks the responder once the remote key is known.
pub async fn accept<F>(mut stream: TcpStream, keypair: &NodeKeypair, bind: F) -> Result<RpcPeer>
where
    F: FnOnce(&[u8; 32]) -> Arc<dyn Responder>,
{
    stream.set_nodelay(true)?;
    let remote_key = handshake(&mut stream, keypair, None).await?;
    let responder = bind(&remote_key);
    Ok(RpcPeer::spawn(stream, remote_key, Some(responder)))
}
