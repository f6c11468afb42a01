//! Daemon-wide state shared by every connection.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use pear_acl::AclStore;
use pear_auth::Authenticator;
use pear_git::GitBridge;
use pear_p2p::NodeKeypair;

use crate::config::Config;
use crate::home::{AppHome, HOME_ENV};
use crate::state::{refresh_state, Drives, RepoState};
use crate::Result;

/// Everything a request handler may touch.
#[derive(Debug)]
pub struct AppContext {
    home: AppHome,
    config: Config,
    keypair: NodeKeypair,
    acl: Arc<AclStore>,
    auth: Authenticator,
    git: GitBridge,
    drives: Drives,
    state: RwLock<Arc<RepoState>>,
    repo_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    refreshing: tokio::sync::Mutex<()>,
}

impl AppContext {
    /// Context for `home`, loading (or creating) the node key stored there.
    pub fn open(home: AppHome, config: Config) -> Result<Self> {
        let keypair = NodeKeypair::load_or_create(&home.secret_path())?;
        Self::new(home, config, keypair)
    }

    /// Context with an explicit node key.
    pub fn new(home: AppHome, config: Config, keypair: NodeKeypair) -> Result<Self> {
        let auth = Authenticator::with_secret(config.auth, config.auth_secret.as_deref())?;
        Ok(Self {
            acl: Arc::new(AclStore::new(home.root())),
            drives: Drives::new(home.clone(), keypair.public_key()),
            git: GitBridge::new().with_env(HOME_ENV, home.root()),
            state: RwLock::new(Arc::new(RepoState::default())),
            repo_locks: DashMap::new(),
            refreshing: tokio::sync::Mutex::new(()),
            home,
            config,
            keypair,
            auth,
        })
    }

    pub fn home(&self) -> &AppHome {
        &self.home
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn keypair(&self) -> &NodeKeypair {
        &self.keypair
    }

    pub fn acl(&self) -> &AclStore {
        &self.acl
    }

    /// Shared handle to the ACL store, for work moved off the runtime.
    pub fn acl_handle(&self) -> Arc<AclStore> {
        Arc::clone(&self.acl)
    }

    pub fn auth(&self) -> &Authenticator {
        &self.auth
    }

    pub fn git(&self) -> &GitBridge {
        &self.git
    }

    pub fn drives(&self) -> &Drives {
        &self.drives
    }

    /// Current advertisement snapshot.
    pub fn state(&self) -> Arc<RepoState> {
        Arc::clone(&self.state.read())
    }

    /// Rebuilds the advertisement table and swaps it in.
    ///
    /// Concurrent refreshes run one after another.
    pub async fn refresh(&self) -> Result<Arc<RepoState>> {
        let _guard = self.refreshing.lock().await;
        let next = Arc::new(refresh_state(&self.home, &self.git, &self.drives).await?);
        let previous = std::mem::replace(&mut *self.state.write(), Arc::clone(&next));
        if !previous.same_advertisement(&next) {
            tracing::info!(repos = next.refs_by_repo.len(), "advertisement changed");
            next.log();
        }
        Ok(next)
    }

    /// True when `remote_key` is this node's own key.
    pub fn is_owner(&self, remote_key: &[u8; 32]) -> bool {
        *remote_key == self.keypair.public_key()
    }

    /// Lock serializing ref mutations of `repo`.
    pub fn repo_lock(&self, repo: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.repo_locks
                .entry(repo.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .value(),
        )
    }
}
