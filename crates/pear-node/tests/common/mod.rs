//! Shared fixtures: a daemon over a temporary home and real git repositories.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use pear_acl::AclPatch;
use pear_auth::{AuthScheme, Authenticator};
use pear_node::{AppContext, AppHome, Config, Daemon, PeerSession};
use pear_p2p::NodeKeypair;
use pear_types::{ObjectId, PearUrl};

pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Creates a work repository on `master` with one commit.
pub fn work_repo(dir: &Path) -> ObjectId {
    std::fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/master"]);
    commit(dir, "README")
}

pub fn commit(dir: &Path, file: &str) -> ObjectId {
    std::fs::write(dir.join(file), file).unwrap();
    git(dir, &["add", file]);
    git(dir, &["commit", "-q", "-m", file]);
    ObjectId::parse(&git(dir, &["rev-parse", "HEAD"])).unwrap()
}

/// A daemon serving a temporary home.
pub struct TestNode {
    pub tmp: tempfile::TempDir,
    pub ctx: Arc<AppContext>,
    pub addr: SocketAddr,
}

impl TestNode {
    pub async fn start(auth: AuthScheme) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let home = AppHome::new(tmp.path().join("home"));
        let config = Config {
            auth,
            ..Config::default()
        };
        let ctx = Arc::new(AppContext::new(home, config, NodeKeypair::generate()).unwrap());
        let daemon = Daemon::bind_to(Arc::clone(&ctx), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = daemon.local_addr().unwrap();
        tokio::spawn(daemon.run(std::future::pending()));
        Self { tmp, ctx, addr }
    }

    pub fn home(&self) -> &AppHome {
        self.ctx.home()
    }

    pub fn key(&self) -> String {
        self.ctx.keypair().public_hex()
    }

    pub fn url(&self, repo: &str) -> PearUrl {
        PearUrl::new(&self.key(), repo).unwrap()
    }

    /// Work directory of the owner's checkout of `repo`.
    pub fn work_path(&self, repo: &str) -> PathBuf {
        self.tmp.path().join("work").join(repo)
    }

    /// Initializes and shares `repo` the way `git pear init --share` does.
    pub async fn share(&self, repo: &str, patch: Option<AclPatch>) -> ObjectId {
        let work = self.work_path(repo);
        let head = work_repo(&work);
        let code = self.home().code_path(repo);
        self.home().create_repo_dir(repo).unwrap();
        let git = pear_git::GitBridge::in_dir(&work);
        git.create_bare_repo(&code).await.unwrap();
        git.add_remote(&code).await.unwrap();
        git.push("master", false).await.unwrap();
        self.home().share(repo).unwrap();
        self.ctx.acl().set_acl(repo, patch).unwrap();

        let state = self.ctx.refresh().await.unwrap();
        state.wait_published().await;
        head
    }

    /// Connects as the holder of `keypair`.
    pub async fn connect(&self, repo: &str, keypair: &NodeKeypair, auth: Authenticator) -> PeerSession {
        let peer = pear_p2p::connect(self.addr, keypair, &self.ctx.keypair().public_key(), None)
            .await
            .unwrap()
            .with_request_timeout(Duration::from_secs(30));
        PeerSession::new(peer, auth, self.url(repo))
    }

    /// Connects with the default auth scheme of the node.
    pub async fn connect_as(&self, repo: &str, keypair: &NodeKeypair) -> PeerSession {
        let scheme = self.ctx.auth().scheme();
        self.connect(repo, keypair, Authenticator::new(scheme)).await
    }

    /// Object `refname` points at in the bare repository of `repo`.
    pub fn bare_ref(&self, repo: &str, refname: &str) -> Option<String> {
        let output = Command::new("git")
            .args(["rev-parse", "--verify", "-q", refname])
            .env("GIT_DIR", self.home().code_path(repo))
            .output()
            .unwrap();
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
