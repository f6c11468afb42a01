//! Request/response multiplexing over one authenticated stream.
//!
//! Both sides of a connection may issue requests. Replies are matched to
//! callers by frame id, so many requests can be in flight at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::message::{Frame, MAX_FRAME_LEN};
use crate::{P2pError, Result};

const OUTGOING_QUEUE: usize = 64;

/// Serves requests arriving from the remote side of a connection.
#[async_trait]
pub trait Responder: Send + Sync + 'static {
    /// Handles one request. An `Err` is sent back as an error frame.
    async fn respond(&self, remote_key: [u8; 32], method: &str, payload: Bytes) -> std::result::Result<Bytes, String>;
}

type Pending = Arc<DashMap<u64, oneshot::Sender<Result<Bytes>>>>;

/// One side of an RPC connection.
pub struct RpcPeer {
    remote_key: [u8; 32],
    next_id: AtomicU64,
    pending: Pending,
    outgoing: mpsc::Sender<Frame>,
    closed: watch::Receiver<bool>,
    request_timeout: Option<Duration>,
    tasks: Vec<JoinHandle<()>>,
}

impl RpcPeer {
    /// Starts serving `stream`, which must already have completed the handshake.
    ///
    /// Incoming requests go to `responder`; without one they are refused.
    pub fn spawn<S>(stream: S, remote_key: [u8; 32], responder: Option<Arc<dyn Responder>>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let codec = || {
            LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec()
        };
        let mut reader = FramedRead::new(read_half, codec());
        let mut writer = FramedWrite::new(write_half, codec());

        let (outgoing, mut queue) = mpsc::channel::<Frame>(OUTGOING_QUEUE);
        let (closed_tx, closed) = watch::channel(false);
        let pending: Pending = Arc::new(DashMap::new());

        let write_task = tokio::spawn(async move {
            while let Some(frame) = queue.recv().await {
                let bytes = match frame.encode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping unencodable frame");
                        continue;
                    }
                };
                if let Err(e) = writer.send(bytes).await {
                    tracing::debug!(error = %e, "write failed, closing");
                    break;
                }
            }
        });

        let replies = outgoing.clone();
        let reader_pending = Arc::clone(&pending);
        let read_task = tokio::spawn(async move {
            while let Some(next) = reader.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes.freeze(),
                    Err(e) => {
                        tracing::debug!(error = %e, "read failed, closing");
                        break;
                    }
                };
                let frame = match Frame::decode(bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed frame, closing");
                        break;
                    }
                };
                match frame {
                    Frame::Request { id, method, payload } => {
                        let replies = replies.clone();
                        let responder = responder.clone();
                        tokio::spawn(async move {
                            let reply = match responder {
                                Some(responder) => match responder.respond(remote_key, &method, payload).await {
                                    Ok(payload) => Frame::Response { id, payload },
                                    Err(message) => Frame::Error { id, message },
                                },
                                None => Frame::Error {
                                    id,
                                    message: format!("no handler for {}", method),
                                },
                            };
                            let _ = replies.send(reply).await;
                        });
                    }
                    Frame::Response { id, payload } => {
                        if let Some((_, tx)) = reader_pending.remove(&id) {
                            let _ = tx.send(Ok(payload));
                        }
                    }
                    Frame::Error { id, message } => {
                        if let Some((_, tx)) = reader_pending.remove(&id) {
                            let _ = tx.send(Err(P2pError::Remote(message)));
                        }
                    }
                }
            }

            let _ = closed_tx.send(true);
            let ids: Vec<u64> = reader_pending.iter().map(|entry| *entry.key()).collect();
            for id in ids {
                if let Some((_, tx)) = reader_pending.remove(&id) {
                    let _ = tx.send(Err(P2pError::Closed));
                }
            }
        });

        Self {
            remote_key,
            next_id: AtomicU64::new(1),
            pending,
            outgoing,
            closed,
            request_timeout: None,
            tasks: vec![read_task, write_task],
        }
    }

    /// Fails requests that take longer than `timeout`.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Verified public key of the remote side.
    pub fn remote_key(&self) -> [u8; 32] {
        self.remote_key
    }

    /// Whether the connection has shut down.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection has shut down.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Calls `method` on the remote side.
    ///
    /// # Errors
    ///
    /// `Remote` carries the remote side's error message. `Closed` and
    /// `Timeout` report transport failures.
    pub async fn request(&self, method: &str, payload: impl Into<Bytes>) -> Result<Bytes> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        if self.is_closed() {
            self.pending.remove(&id);
            return Err(P2pError::Closed);
        }

        let frame = Frame::Request {
            id,
            method: method.to_string(),
            payload: payload.into(),
        };
        if self.outgoing.send(frame).await.is_err() {
            self.pending.remove(&id);
            return Err(P2pError::Closed);
        }

        let reply = match self.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.pending.remove(&id);
                    return Err(P2pError::Timeout);
                }
            },
            None => rx.await,
        };
        reply.map_err(|_| P2pError::Closed)?
    }
}

impl Drop for RpcPeer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for RpcPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcPeer")
            .field("remote_key", &hex::encode(self.remote_key))
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Responder for Echo {
        async fn respond(&self, _remote_key: [u8; 32], method: &str, payload: Bytes) -> std::result::Result<Bytes, String> {
            match method {
                "echo" => Ok(payload),
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(Bytes::from_static(b"late"))
                }
                other => Err(format!("unknown method {}", other)),
            }
        }
    }

    fn pair() -> (RpcPeer, RpcPeer) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let client = RpcPeer::spawn(a, [2u8; 32], None);
        let server = RpcPeer::spawn(b, [1u8; 32], Some(Arc::new(Echo)));
        (client, server)
    }

    #[tokio::test]
    async fn test_request_response() {
        let (client, _server) = pair();
        let reply = client.request("echo", Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(&reply[..], b"hi");
        assert_eq!(client.remote_key(), [2u8; 32]);
    }

    #[tokio::test]
    async fn test_remote_error_is_returned() {
        let (client, _server) = pair();
        let err = client.request("nope", Bytes::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "unknown method nope");
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_matched() {
        let (client, _server) = pair();
        let client = Arc::new(client);
        let mut handles = Vec::new();
        for i in 0..20u8 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                let reply = client.request("echo", vec![i; 3]).await.unwrap();
                assert_eq!(&reply[..], &[i; 3]);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_side_without_responder_refuses() {
        let (client, server) = pair();
        let err = server.request("echo", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, P2pError::Remote(_)));
        drop(client);
    }

    #[tokio::test]
    async fn test_closed_connection_fails_pending() {
        let (client, server) = pair();
        let client = Arc::new(client);
        let waiting = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request("slow", Bytes::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(server);
        assert!(matches!(waiting.await.unwrap(), Err(P2pError::Closed)));
        client.closed().await;
        assert!(client.is_closed());
        assert!(matches!(client.request("echo", Bytes::new()).await, Err(P2pError::Closed)));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (a, b) = tokio::io::duplex(1024);
        let client = RpcPeer::spawn(a, [2u8; 32], None).with_request_timeout(Duration::from_millis(20));
        let _server = RpcPeer::spawn(b, [1u8; 32], Some(Arc::new(Echo)));
        assert!(matches!(client.request("slow", Bytes::new()).await, Err(P2pError::Timeout)));
    }
}
