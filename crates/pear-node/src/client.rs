//! Client side of the RPC protocol, used by the CLI and the remote helper.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use pear_acl::AclRecord;
use pear_auth::{AuthScheme, Authenticator};
use pear_p2p::{BlobReader, Drive, NodeKeypair, P2pError, PeerDirectory, RpcPeer};
use pear_types::{PearUrl, RefTable, RequestBody};
use serde::de::DeserializeOwned;
use tokio_util::io::StreamReader;

use crate::config::Config;
use crate::home::AppHome;
use crate::router::Method;
use crate::{NodeError, Result};

/// Transport key presented when dialing a peer.
///
/// Under the signed scheme the user id comes from the event, so the key is
/// ephemeral. Otherwise the key is the user id and must be the node key.
pub fn client_keypair(home: &AppHome, scheme: AuthScheme) -> Result<NodeKeypair> {
    match scheme {
        AuthScheme::ExternalSigned => Ok(NodeKeypair::generate()),
        AuthScheme::None | AuthScheme::TransportNative => {
            Ok(NodeKeypair::load_or_create(&home.secret_path())?)
        }
    }
}

/// An authenticated RPC session with the peer owning a `pear://` URL.
#[derive(Debug)]
pub struct PeerSession {
    peer: RpcPeer,
    auth: Authenticator,
    url: PearUrl,
}

impl PeerSession {
    /// Connects to the owner of `url`, verifying that it holds the URL's key.
    pub async fn connect(
        directory: &PeerDirectory,
        keypair: &NodeKeypair,
        url: PearUrl,
        auth: Authenticator,
        request_timeout: Duration,
    ) -> Result<Self> {
        let addr = directory.resolve(url.key())?;
        tracing::debug!(key = %url.key(), %addr, "connecting");
        let peer = pear_p2p::connect(addr, keypair, &url.key_bytes(), None)
            .await?
            .with_request_timeout(request_timeout);
        Ok(Self::new(peer, auth, url))
    }

    /// Dials the owner of `url` using the configuration of `home`.
    pub async fn open(home: &AppHome, config: &Config, url: PearUrl) -> Result<Self> {
        let node_key = NodeKeypair::load_or_create(&home.secret_path())?;
        let directory = config.directory(&node_key.public_hex());
        let keypair = client_keypair(home, config.auth)?;
        let auth = Authenticator::with_secret(config.auth, config.auth_secret.as_deref())?;
        Self::connect(&directory, &keypair, url, auth, config.request_timeout()).await
    }

    /// Dials this node's own daemon with the node key, as the owner of `repo`.
    pub async fn open_own(home: &AppHome, config: &Config, repo: &str) -> Result<Self> {
        let node_key = NodeKeypair::load_or_create(&home.secret_path())?;
        let url = PearUrl::new(&node_key.public_hex(), repo)?;
        let directory = config.directory(&node_key.public_hex());
        let auth = Authenticator::with_secret(config.auth, config.auth_secret.as_deref())?;
        Self::connect(&directory, &node_key, url, auth, config.request_timeout()).await
    }

    /// Session over an already established peer.
    pub fn new(peer: RpcPeer, auth: Authenticator, url: PearUrl) -> Self {
        Self { peer, auth, url }
    }

    pub fn url(&self) -> &PearUrl {
        &self.url
    }

    /// Sends `body`, signed when the auth scheme requires it.
    pub async fn call(&self, body: RequestBody) -> Result<Bytes> {
        let method = body.method.clone();
        let request = self.auth.request(body)?;
        let payload = serde_json::to_vec(&request)?;
        Ok(self.peer.request(&method, payload).await?)
    }

    async fn call_json<T: DeserializeOwned>(&self, body: RequestBody) -> Result<T> {
        let reply = self.call(body).await?;
        Ok(serde_json::from_slice(&reply)?)
    }

    fn body(&self, method: Method) -> RequestBody {
        RequestBody::new(self.url.to_string(), method.as_str())
    }

    // ==================== Read side ====================

    /// Visible repositories and their drive keys.
    pub async fn get_repos(&self) -> Result<BTreeMap<String, String>> {
        self.call_json(self.body(Method::GetRepos)).await
    }

    /// Ref table of the session's repository.
    pub async fn get_refs(&self) -> Result<RefTable> {
        self.call_json(self.body(Method::GetRefs)).await
    }

    /// Remote view of the drive with `key`.
    pub fn drive(self: &Arc<Self>, key: impl Into<String>) -> RemoteDrive {
        RemoteDrive {
            session: Arc::clone(self),
            key: key.into(),
        }
    }

    async fn drive_exists(&self, key: &str, path: &str) -> Result<bool> {
        self.call_json(self.body(Method::DriveExists).with_name(key).with_data(path))
            .await
    }

    async fn drive_read(&self, key: &str, path: &str, offset: u64) -> Result<Bytes> {
        self.call(
            self.body(Method::DriveRead)
                .with_name(key)
                .with_data(path)
                .with_offset(offset),
        )
        .await
    }

    // ==================== Push side ====================

    /// Asks the peer to pull `data` (`<branch>#<commit>`) from `source_url`,
    /// or to delete the branch. Returns git's output on the peer.
    pub async fn push(&self, method: Method, source_url: &str, data: &str) -> Result<String> {
        if !method.mutates_refs() {
            return Err(NodeError::Validation(format!("{} is not a push method", method)));
        }
        self.call_json(RequestBody::new(source_url, method.as_str()).with_data(data))
            .await
    }

    // ==================== ACL ====================

    pub async fn get_acl(&self) -> Result<AclRecord> {
        self.call_json(self.body(Method::GetAcl)).await
    }

    /// Grants a role; `user_role` is `<user>:<role>`.
    pub async fn grant(&self, user_role: &str) -> Result<AclRecord> {
        self.call_json(self.body(Method::AddAcl).with_name(user_role)).await
    }

    pub async fn revoke(&self, user: &str) -> Result<AclRecord> {
        self.call_json(self.body(Method::DelAcl).with_name(user)).await
    }

    /// Protects `branch`, returning the protected branch list.
    pub async fn protect(&self, branch: &str) -> Result<Vec<String>> {
        self.call_json(self.body(Method::AddAcl).with_name(branch).for_branch(true))
            .await
    }

    pub async fn unprotect(&self, branch: &str) -> Result<Vec<String>> {
        self.call_json(self.body(Method::DelAcl).with_name(branch).for_branch(true))
            .await
    }
}

/// A peer's drive, read in chunks over the session.
#[derive(Debug, Clone)]
pub struct RemoteDrive {
    session: Arc<PeerSession>,
    key: String,
}

fn transport_error(e: NodeError) -> P2pError {
    match e {
        NodeError::P2p(e) => e,
        other => P2pError::Remote(other.to_string()),
    }
}

#[async_trait]
impl Drive for RemoteDrive {
    fn key(&self) -> &str {
        &self.key
    }

    async fn exists(&self, path: &str) -> pear_p2p::Result<bool> {
        self.session
            .drive_exists(&self.key, path)
            .await
            .map_err(transport_error)
    }

    async fn reader(&self, path: &str) -> pear_p2p::Result<BlobReader> {
        let session = Arc::clone(&self.session);
        let key = self.key.clone();
        let path = path.to_string();
        let chunks = futures::stream::try_unfold(0u64, move |offset| {
            let session = Arc::clone(&session);
            let key = key.clone();
            let path = path.clone();
            async move {
                let chunk = session
                    .drive_read(&key, &path, offset)
                    .await
                    .map_err(|e| std::io::Error::other(e.to_string()))?;
                if chunk.is_empty() {
                    return Ok(None);
                }
                let next = offset + chunk.len() as u64;
                Ok::<_, std::io::Error>(Some((chunk, next)))
            }
        });
        Ok(Box::new(StreamReader::new(Box::pin(chunks))))
    }
}
