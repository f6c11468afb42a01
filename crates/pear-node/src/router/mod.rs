//! Per-connection request dispatch.
//!
//! Each request runs **Authenticate → Parse → Authorize → Execute →
//! Respond**. A failure at any step becomes an error reply; the connection
//! stays open.

mod connections;
mod error;
mod handlers;
mod method;

pub use connections::ConnectionRegistry;
pub use error::{RouterError, NOT_ALLOWED, NOT_ALLOWED_TO_ACCESS, NOT_ALLOWED_TO_PUSH, NOT_ALLOWED_TO_PUSH_BRANCH};
pub use method::Method;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use pear_p2p::Responder;
use pear_types::Request;
use tracing::Instrument;

use crate::context::AppContext;
use handlers::Caller;

/// Serves RPC requests against the shared daemon context.
#[derive(Debug, Clone)]
pub struct Router {
    ctx: Arc<AppContext>,
}

impl Router {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Methods this router answers.
    pub fn methods(&self) -> Vec<Method> {
        Method::served_under(self.ctx.auth().scheme())
    }

    /// Runs one request through the pipeline.
    pub async fn handle(&self, remote_key: &[u8; 32], method: &str, payload: &[u8]) -> Result<Bytes, RouterError> {
        let scheme = self.ctx.auth().scheme();
        let method = Method::parse(method)
            .filter(|m| m.is_served_under(scheme))
            .ok_or_else(|| RouterError::UnknownMethod(method.to_string()))?;

        let request: Request = serde_json::from_slice(payload)
            .map_err(|e| RouterError::Validation(format!("malformed request: {}", e)))?;

        let user = self
            .ctx
            .auth()
            .authenticate(remote_key, &request)
            .inspect_err(|e| tracing::debug!(%method, reason = e.detail(), "authentication failed"))?;
        let caller = Caller {
            user,
            owner: self.ctx.is_owner(remote_key),
        };

        let ctx = &*self.ctx;
        let body = &request.body;
        match method {
            Method::GetRepos => handlers::get_repos(ctx, &caller).await,
            Method::GetRefs => handlers::get_refs(ctx, &caller, body).await,
            Method::Push | Method::ForcePush | Method::DeleteBranch => handlers::push(ctx, &caller, method, body).await,
            Method::GetAcl => handlers::get_acl(ctx, &caller, body).await,
            Method::AddAcl => handlers::add_acl(ctx, &caller, body).await,
            Method::DelAcl => handlers::del_acl(ctx, &caller, body).await,
            Method::DriveExists => handlers::drive_exists(ctx, &caller, body).await,
            Method::DriveRead => handlers::drive_read(ctx, &caller, body).await,
        }
    }
}

#[async_trait]
impl Responder for Router {
    async fn respond(&self, remote_key: [u8; 32], method: &str, payload: Bytes) -> Result<Bytes, String> {
        let span = tracing::debug_span!("rpc", %method, peer = %hex::encode(&remote_key[..8]));
        match self.handle(&remote_key, method, &payload).instrument(span).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                match &e {
                    RouterError::Denied(_) | RouterError::Auth(_) | RouterError::NotFound(_) => {
                        tracing::debug!(error = %e, "request refused")
                    }
                    _ => tracing::warn!(error = %e, "request failed"),
                }
                Err(e.to_string())
            }
        }
    }
}
