//! The accept loop and the home directory watcher.

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use pear_p2p::{accept, discovery_key, Responder};
use tokio::net::{TcpListener, TcpStream};

use crate::context::AppContext;
use crate::router::{ConnectionRegistry, Router};
use crate::{NodeError, Result};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// A bound daemon, ready to serve.
#[derive(Debug)]
pub struct Daemon {
    ctx: Arc<AppContext>,
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
}

impl Daemon {
    /// Binds the configured listen address.
    pub async fn bind(ctx: Arc<AppContext>) -> Result<Self> {
        let addr = ctx.config().listen_addr;
        Self::bind_to(ctx, addr).await
    }

    /// Binds `addr`; port 0 picks a free port.
    pub async fn bind_to(ctx: Arc<AppContext>, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            ctx,
            listener,
            registry: Arc::new(ConnectionRegistry::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accepts connections until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let key = self.ctx.keypair().public_key();
        tracing::info!(
            public_key = %hex::encode(key),
            topic = %hex::encode(discovery_key(&key)),
            addr = %self.local_addr()?,
            methods = ?Router::new(Arc::clone(&self.ctx)).methods(),
            "daemon listening"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let ctx = Arc::clone(&self.ctx);
                        let registry = Arc::clone(&self.registry);
                        tokio::spawn(serve_connection(ctx, registry, stream, addr));
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
            }
        }
    }
}

async fn serve_connection(ctx: Arc<AppContext>, registry: Arc<ConnectionRegistry>, stream: TcpStream, addr: SocketAddr) {
    let bound = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        accept(stream, ctx.keypair(), |key| {
            registry.acquire(*key, || Router::new(Arc::clone(&ctx))) as Arc<dyn Responder>
        }),
    )
    .await;

    let peer = match bound {
        Ok(Ok(peer)) => peer,
        Ok(Err(e)) => {
            tracing::debug!(%addr, error = %e, "connection rejected");
            return;
        }
        Err(_) => {
            tracing::debug!(%addr, "handshake timed out");
            return;
        }
    };

    let key = peer.remote_key();
    tracing::debug!(%addr, peer = %hex::encode(&key[..8]), "peer connected");
    peer.closed().await;
    registry.release(&key);
    tracing::debug!(%addr, "peer disconnected");
}

/// Refreshes the advertisement whenever something under the home changes.
///
/// Hidden entries (drives, pid file, node key) are ignored. The returned
/// debouncer must be kept alive for the watch to continue.
pub fn watch_home(ctx: Arc<AppContext>) -> Result<Debouncer<RecommendedWatcher>> {
    let root = ctx.home().root().to_path_buf();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);

    let filter_root = root.clone();
    let mut debouncer = new_debouncer(WATCH_DEBOUNCE, move |result: DebounceEventResult| match result {
        Ok(events) => {
            if events.iter().any(|event| is_relevant(&filter_root, &event.path)) {
                // a refresh is already queued when this fails
                let _ = tx.try_send(());
            }
        }
        Err(e) => tracing::warn!(error = %e, "watch error"),
    })
    .map_err(|e| NodeError::Config(format!("cannot watch {}: {}", root.display(), e)))?;

    debouncer
        .watcher()
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| NodeError::Config(format!("cannot watch {}: {}", root.display(), e)))?;

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            if let Err(e) = ctx.refresh().await {
                tracing::error!(error = %e, "refresh failed");
            }
        }
    });
    Ok(debouncer)
}

fn is_relevant(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    match relative.components().next() {
        Some(Component::Normal(first)) => {
            let first = first.to_string_lossy();
            !first.starts_with('.') && !first.ends_with(".log")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_filter() {
        let root = Path::new("/home/u/.gitpear");
        assert!(is_relevant(root, &root.join("foo/code/refs/heads/master")));
        assert!(is_relevant(root, &root.join("foo/.git-daemon-export-ok")));
        assert!(!is_relevant(root, &root.join(".drives/foo/packs/a.pack")));
        assert!(!is_relevant(root, &root.join(".daemon.pid")));
        assert!(!is_relevant(root, &root.join("out.log")));
        assert!(!is_relevant(root, Path::new("/elsewhere/foo")));
        assert!(!is_relevant(root, root));
    }
}
