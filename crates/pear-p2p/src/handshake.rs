//! Mutual key handshake.
//!
//! Each side sends `public_key(32) || nonce(32)`, then a signature over
//! `DOMAIN || peer_nonce || own_public_key`. A side that cannot sign the
//! other's fresh nonce does not own the key it announced.

use crate::keypair::{verify, NodeKeypair};
use crate::{P2pError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const DOMAIN: &[u8] = b"gitpear-handshake";

fn transcript(nonce: &[u8; 32], public_key: &[u8; 32]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DOMAIN.len() + 64);
    msg.extend_from_slice(DOMAIN);
    msg.extend_from_slice(nonce);
    msg.extend_from_slice(public_key);
    msg
}

/// Runs the handshake over `stream` and returns the verified remote key.
///
/// When `expected` is set, a peer presenting any other key is rejected.
pub async fn handshake<S>(stream: &mut S, keypair: &NodeKeypair, expected: Option<&[u8; 32]>) -> Result<[u8; 32]>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let own_key = keypair.public_key();
    let nonce: [u8; 32] = rand::random();

    let mut hello = [0u8; 64];
    hello[..32].copy_from_slice(&own_key);
    hello[32..].copy_from_slice(&nonce);
    stream.write_all(&hello).await?;
    stream.flush().await?;

    let mut remote_hello = [0u8; 64];
    stream.read_exact(&mut remote_hello).await.map_err(closed)?;
    let mut remote_key = [0u8; 32];
    remote_key.copy_from_slice(&remote_hello[..32]);
    let mut remote_nonce = [0u8; 32];
    remote_nonce.copy_from_slice(&remote_hello[32..]);

    if let Some(expected) = expected {
        if *expected != remote_key {
            return Err(P2pError::Handshake(format!(
                "expected key {}, peer presented {}",
                hex::encode(expected),
                hex::encode(remote_key)
            )));
        }
    }

    let signature = keypair.sign(&transcript(&remote_nonce, &own_key));
    stream.write_all(&signature).await?;
    stream.flush().await?;

    let mut remote_sig = [0u8; 64];
    stream.read_exact(&mut remote_sig).await.map_err(closed)?;
    verify(&remote_key, &transcript(&nonce, &remote_key), &remote_sig)?;

    tracing::debug!(remote = %hex::encode(&remote_key[..8]), "handshake complete");
    Ok(remote_key)
}

fn closed(e: std::io::Error) -> P2pError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        P2pError::Handshake("peer closed during handshake".into())
    } else {
        e.into()
    }
}
