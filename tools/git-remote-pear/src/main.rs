//! Git remote helper for `pear://<key>/<repo>` urls.
//!
//! git runs `git-remote-pear <remote> <url>` and talks to it over stdio.
//! Refs are read from the owning peer with RPC, packs are streamed from the
//! peer's drive into `git index-pack`. A push first lands in the local bare
//! mirror; the peer then fetches it from `pear://<own key>/<repo>`.
//!
//! Logs go to stderr; stdout belongs to git.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use clap::Parser;
use pear_git::GitBridge;
use pear_node::observability::{init_logging, LogFormat};
use pear_node::{AppHome, Config, Method, NodeError, PeerSession, RemoteDrive};
use pear_p2p::{BlobReader, Drive, NodeKeypair, P2pError};
use pear_types::{pack_path, ObjectId, PearUrl, RefTable};
use tokio::io::BufReader;
use tokio::sync::OnceCell;

mod helper;

use helper::{Helper, HelperError, LocalRepo, Remote};

/// Git remote helper for gitpear
#[derive(Parser, Debug)]
#[command(name = "git-remote-pear")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the git remote
    remote: String,
    /// pear://<key>/<repo>
    url: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging("warn", LogFormat::Compact);

    if let Err(e) = run(args).await {
        tracing::error!(error = %format!("{:#}", e), "remote helper failed");
        eprintln!("git-remote-pear: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let url = PearUrl::parse(&args.url).context("Invalid URL")?;
    let home = AppHome::from_env()?;
    let config = Config::load(&home.config_path())?;
    tracing::debug!(remote = %args.remote, %url, auth = %config.auth, "connecting");

    let session = Arc::new(PeerSession::open(&home, &config, url.clone()).await?);
    let repos = session.get_repos().await.context("Failed to retrieve repositories")?;
    let drive_key = repos
        .get(url.repo())
        .ok_or_else(|| anyhow!("Failed to retrieve repository {}", url.repo()))?;
    let refs = session.get_refs().await.context("Failed to retrieve refs")?;

    let own_key = NodeKeypair::load_or_create(&home.secret_path())?.public_hex();
    let remote = PeerRemote {
        drive: session.drive(drive_key.clone()),
        source_url: PearUrl::new(&own_key, url.repo())?.to_string(),
        session,
        refs,
    };
    let local = LocalGit {
        git: GitBridge::new(),
        home,
        config,
        repo: url.repo().to_string(),
        own: OnceCell::new(),
    };

    Helper::new(remote, local)
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;
    Ok(())
}

/// The peer owning the url.
struct PeerRemote {
    session: Arc<PeerSession>,
    drive: RemoteDrive,
    refs: RefTable,
    /// Where the peer fetches pushed commits from.
    source_url: String,
}

fn remote_error(e: NodeError) -> HelperError {
    match e {
        NodeError::P2p(P2pError::Remote(msg)) => HelperError::Remote(msg),
        other => HelperError::Remote(other.to_string()),
    }
}

#[async_trait]
impl Remote for PeerRemote {
    fn refs(&self) -> &RefTable {
        &self.refs
    }

    async fn pack_exists(&self, oid: &ObjectId) -> helper::Result<bool> {
        self.drive
            .exists(&pack_path(oid))
            .await
            .map_err(|e| HelperError::Remote(e.to_string()))
    }

    async fn pack(&self, oid: &ObjectId) -> helper::Result<BlobReader> {
        self.drive
            .reader(&pack_path(oid))
            .await
            .map_err(|e| HelperError::Remote(e.to_string()))
    }

    async fn push(&self, method: Method, data: &str) -> helper::Result<String> {
        self.session
            .push(method, &self.source_url, data)
            .await
            .map_err(remote_error)
    }
}

/// The repository git runs us in, and the daemon sharing its mirror.
struct LocalGit {
    git: GitBridge,
    home: AppHome,
    config: Config,
    repo: String,
    own: OnceCell<OwnDaemon>,
}

/// Owner session with the local daemon.
struct OwnDaemon {
    session: Arc<PeerSession>,
    drive: RemoteDrive,
}

fn local_daemon_error(e: NodeError) -> HelperError {
    HelperError::Local(format!("local daemon: {}", e))
}

impl LocalGit {
    async fn own_daemon(&self) -> helper::Result<&OwnDaemon> {
        self.own
            .get_or_try_init(|| async {
                let session = PeerSession::open_own(&self.home, &self.config, &self.repo)
                    .await
                    .map_err(local_daemon_error)?;
                let repos = session.get_repos().await.map_err(local_daemon_error)?;
                let key = repos
                    .get(&self.repo)
                    .ok_or_else(|| HelperError::Local(format!("{} is not shared by the local daemon", self.repo)))?;
                let session = Arc::new(session);
                Ok::<_, HelperError>(OwnDaemon {
                    drive: session.drive(key.clone()),
                    session,
                })
            })
            .await
    }
}

#[async_trait]
impl LocalRepo for LocalGit {
    async fn unpack(&self, pack: BlobReader) -> helper::Result<()> {
        self.git
            .unpack_stream(pack)
            .await
            .map_err(|e| HelperError::Local(e.to_string()))
    }

    async fn push_to_mirror(&self, src: &str, dst: &str, force: bool) -> helper::Result<()> {
        self.git
            .push(&format!("{}:{}", src, dst), force)
            .await
            .map_err(|e| HelperError::Local(e.stderr().map(str::to_string).unwrap_or_else(|| e.to_string())))
    }

    async fn resolve(&self, rev: &str) -> helper::Result<ObjectId> {
        self.git
            .rev_parse(rev)
            .await
            .map_err(|e| HelperError::Local(e.to_string()))
    }

    async fn is_published(&self, dst: &str, commit: &ObjectId) -> helper::Result<bool> {
        let own = self.own_daemon().await?;
        let refs = own.session.get_refs().await.map_err(local_daemon_error)?;
        if refs.get(dst) != Some(commit) {
            tracing::debug!(%dst, %commit, "waiting for the local advertisement");
            return Ok(false);
        }
        own.drive
            .exists(&pack_path(commit))
            .await
            .map_err(|e| HelperError::Local(format!("local daemon: {}", e)))
    }
}
