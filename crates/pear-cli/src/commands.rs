//! CLI command implementations.

use std::io::Write;
use std::path::{Path, PathBuf};

use pear_acl::{AclPatch, AclStore, Visibility, ACL_FILE};
use pear_git::GitBridge;
use pear_node::{AppHome, Config, NodeError, PeerSession};
use pear_p2p::NodeKeypair;
use pear_types::{validate_repo_name, PearUrl, MIRROR_REMOTE};
use thiserror::Error;

use crate::step::{Step, StepOutcome};

/// CLI errors. Each is reported as one line on stderr.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0} is not a git repo")]
    NotAGitRepo(String),

    #[error("{0} is not initialized")]
    NotInitialized(String),

    /// Wrong combination of arguments.
    #[error("{0}")]
    Usage(String),

    #[error("{step}: {reason}")]
    Step { step: &'static str, reason: String },

    #[error("Daemon already running with PID: {0}")]
    DaemonRunning(u32),

    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Daemon exited with {0}")]
    DaemonExited(std::process::ExitStatus),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Acl(#[from] pear_acl::AclError),

    #[error(transparent)]
    Git(#[from] pear_git::GitError),

    #[error(transparent)]
    Type(#[from] pear_types::TypeError),

    #[error(transparent)]
    P2p(#[from] pear_p2p::P2pError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;

/// Resolves the work tree at `path` and the repository name it maps to.
pub fn checkout(path: &Path) -> Result<(PathBuf, String)> {
    let not_a_repo = || CliError::NotAGitRepo(path.display().to_string());
    let dir = path.canonicalize().map_err(|_| not_a_repo())?;
    if !dir.join(".git").exists() {
        return Err(not_a_repo());
    }
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(not_a_repo)?
        .to_string();
    validate_repo_name(&name)?;
    Ok((dir, name))
}

fn initialized(home: &AppHome, path: &Path) -> Result<(PathBuf, String)> {
    let (dir, name) = checkout(path)?;
    if !home.is_initialized(&name) {
        return Err(CliError::NotInitialized(name));
    }
    Ok((dir, name))
}

// ==================== init / share / unshare ====================

/// Registers the repository at `dir` with gitpear.
///
/// Every step is idempotent, so running `init` again completes a partial
/// earlier run. `share` is `Some(None)` to share the current branch.
pub async fn init(home: &AppHome, dir: &Path, share: Option<Option<String>>) -> Result<()> {
    let (dir, name) = checkout(dir)?;
    let git = GitBridge::in_dir(&dir);
    let code = home.code_path(&name);

    let existed = home.repo_path(&name).is_dir();
    Step {
        name: "project folder",
        created: format!("Added project \"{}\" to gitpear", name),
        exists: format!("Project \"{}\" is already in gitpear", name),
    }
    .report(StepOutcome::of(home.create_repo_dir(&name).map(|_| !existed)))?;

    let bare = if home.is_initialized(&name) {
        Ok(false)
    } else {
        git.create_bare_repo(&code).await.map(|_| true)
    };
    Step {
        name: "bare repo",
        created: format!("Created bare repo for \"{}\"", name),
        exists: format!("Bare repo for \"{}\" already exists", name),
    }
    .report(StepOutcome::of(bare))?;

    let remote = match git.remote_url().await {
        Ok(Some(url)) => {
            if Path::new(&url) != code {
                tracing::warn!(%url, expected = %code.display(), "remote {} points elsewhere", MIRROR_REMOTE);
            }
            Ok(false)
        }
        Ok(None) => git.add_remote(&code).await.map(|_| true),
        Err(e) => Err(e),
    };
    Step {
        name: "git remote",
        created: format!("Added git remote for \"{}\" as \"{}\"", name, MIRROR_REMOTE),
        exists: format!("Git remote \"{}\" already set for \"{}\"", MIRROR_REMOTE, name),
    }
    .report(StepOutcome::of(remote))?;

    if let Some(branch) = share {
        let branch = match branch.filter(|b| !b.is_empty()) {
            Some(branch) => branch,
            None => git.get_current_branch().await?,
        };
        share_repo(home, &git, &name, &branch, None).await?;
    }
    Ok(())
}

/// Shares an initialized repository and pushes `branch` into its mirror.
pub async fn share(home: &AppHome, dir: &Path, branch: Option<String>, visibility: Visibility) -> Result<()> {
    let (dir, name) = initialized(home, dir)?;
    let git = GitBridge::in_dir(&dir);
    let branch = match branch.filter(|b| !b.is_empty()) {
        Some(branch) => branch,
        None => git.get_current_branch().await?,
    };
    share_repo(home, &git, &name, &branch, Some(visibility)).await
}

async fn share_repo(
    home: &AppHome,
    git: &GitBridge,
    name: &str,
    branch: &str,
    visibility: Option<Visibility>,
) -> Result<()> {
    let was_shared = home.is_shared(name);
    Step {
        name: "share marker",
        created: format!("Marked \"{}\" as shared", name),
        exists: format!("\"{}\" is already shared", name),
    }
    .report(StepOutcome::of(home.share(name).map(|_| !was_shared)))?;

    Step {
        name: "acl",
        created: format!("Set ACL of \"{}\"", name),
        exists: format!("ACL of \"{}\" unchanged", name),
    }
    .report(StepOutcome::of(apply_visibility(home, name, visibility)))?;

    Step {
        name: "push",
        created: format!("Pushed {} to the \"{}\" mirror", branch, MIRROR_REMOTE),
        exists: String::new(),
    }
    .report(StepOutcome::of(git.push(branch, false).await.map(|_| true)))?;

    let mut message = format!("Shared \"{}\" project, {} branch", name, branch);
    if let Some(visibility) = visibility {
        message.push_str(&format!(", as {} repo", visibility));
    }
    println!("{}", message);
    Ok(())
}

/// Writes the first ACL record of `name`, or updates the visibility of an
/// existing one. Existing grants are kept.
fn apply_visibility(home: &AppHome, name: &str, visibility: Option<Visibility>) -> pear_acl::Result<bool> {
    let store = AclStore::new(home.root());
    if !home.repo_path(name).join(ACL_FILE).exists() {
        store.set_acl(name, visibility.map(AclPatch::visibility))?;
        return Ok(true);
    }
    match visibility {
        Some(wanted) if store.get_repo_visibility(name)? != wanted => {
            match wanted {
                Visibility::Public => store.make_repo_public(name)?,
                Visibility::Private => store.make_repo_private(name)?,
            };
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Stops sharing the repository at `dir`. Its data stays in place.
pub fn unshare(home: &AppHome, dir: &Path) -> Result<()> {
    let (_, name) = initialized(home, dir)?;
    home.unshare(&name)?;
    println!("Unshared \"{}\" project", name);
    Ok(())
}

// ==================== list / key ====================

/// Lists local repositories, or those a remote peer lets us see.
pub async fn list(home: &AppHome, url: Option<&str>, shared: bool, out: &mut dyn Write) -> Result<()> {
    if let Some(url) = url {
        let url = PearUrl::parse_peer(url)?;
        let config = Config::load(&home.config_path())?;
        let session = PeerSession::open(home, &config, url).await?;
        writeln!(out, "Repositories:\tDrive:")?;
        for (repo, drive) in session.get_repos().await? {
            writeln!(out, "{}\t{}", repo, drive)?;
        }
        return Ok(());
    }

    let key = node_key(home)?;
    for name in home.list(shared)? {
        if shared {
            writeln!(out, "{}\t{}", name, PearUrl::new(&key, &name)?)?;
        } else {
            writeln!(out, "{}", name)?;
        }
    }
    Ok(())
}

/// Prints the node's public key.
pub fn key(home: &AppHome, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "Public key: {}", node_key(home)?)?;
    Ok(())
}

fn node_key(home: &AppHome) -> Result<String> {
    Ok(NodeKeypair::load_or_create(&home.secret_path())?.public_hex())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::process::Command;

    pub(crate) fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .output()
            .unwrap();
        assert!(output.status.success(), "git {:?}: {}", args, String::from_utf8_lossy(&output.stderr));
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// A home and a work repository named `name` with one commit on master.
    pub(crate) fn fixture(name: &str) -> (tempfile::TempDir, AppHome, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let home = AppHome::new(tmp.path().join("home"));
        let work = tmp.path().join(name);
        std::fs::create_dir_all(&work).unwrap();
        git(&work, &["init", "-q"]);
        git(&work, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        std::fs::write(work.join("README"), "hello").unwrap();
        git(&work, &["add", "README"]);
        git(&work, &["commit", "-q", "-m", "init"]);
        (tmp, home, work)
    }

    #[test]
    fn test_checkout_requires_git_repo() {
        let tmp = tempfile::tempdir().unwrap();
        let err = checkout(tmp.path()).unwrap_err();
        assert!(matches!(err, CliError::NotAGitRepo(_)));
        assert!(matches!(
            checkout(&tmp.path().join("missing")).unwrap_err(),
            CliError::NotAGitRepo(_)
        ));
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let (_tmp, home, work) = fixture("foo");

        init(&home, &work, None).await.unwrap();
        assert!(home.is_initialized("foo"));
        assert!(!home.is_shared("foo"));
        assert_eq!(
            git(&work, &["remote", "get-url", MIRROR_REMOTE]),
            home.code_path("foo").to_string_lossy()
        );

        init(&home, &work, None).await.unwrap();
        assert!(home.is_initialized("foo"));
    }

    #[tokio::test]
    async fn test_init_and_share_current_branch() {
        let (_tmp, home, work) = fixture("foo");
        init(&home, &work, Some(None)).await.unwrap();

        assert!(home.is_shared("foo"));
        let head = git(&work, &["rev-parse", "HEAD"]);
        let mirrored = Command::new("git")
            .args(["rev-parse", "refs/heads/master"])
            .env("GIT_DIR", home.code_path("foo"))
            .output()
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&mirrored.stdout).trim(), head);

        let store = AclStore::new(home.root());
        assert_eq!(store.get_repo_visibility("foo").unwrap(), Visibility::Public);
    }

    #[tokio::test]
    async fn test_share_keeps_grants() {
        let (_tmp, home, work) = fixture("foo");
        init(&home, &work, None).await.unwrap();
        share(&home, &work, None, Visibility::Public).await.unwrap();

        let store = AclStore::new(home.root());
        store.grant_access_to_user("foo", "alice", "viewer").unwrap();
        share(&home, &work, Some("master".into()), Visibility::Private).await.unwrap();

        let record = store.get_acl("foo").unwrap();
        assert_eq!(record.visibility, Visibility::Private);
        assert!(record.role_of("alice").is_some());
    }

    #[tokio::test]
    async fn test_share_requires_init() {
        let (_tmp, home, work) = fixture("foo");
        let err = share(&home, &work, None, Visibility::Public).await.unwrap_err();
        assert_eq!(err.to_string(), "foo is not initialized");
    }

    #[tokio::test]
    async fn test_share_unknown_branch_fails() {
        let (_tmp, home, work) = fixture("foo");
        init(&home, &work, None).await.unwrap();
        let err = share(&home, &work, Some("nope".into()), Visibility::Public)
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Step { step: "push", .. }));
    }

    #[tokio::test]
    async fn test_unshare_and_list() {
        let (_tmp, home, work) = fixture("foo");
        init(&home, &work, Some(None)).await.unwrap();

        let mut out = Vec::new();
        list(&home, None, true, &mut out).await.unwrap();
        let key = NodeKeypair::load_or_create(&home.secret_path()).unwrap().public_hex();
        assert_eq!(String::from_utf8(out).unwrap(), format!("foo\tpear://{}/foo\n", key));

        unshare(&home, &work).unwrap();
        let mut out = Vec::new();
        list(&home, None, true, &mut out).await.unwrap();
        assert!(out.is_empty());

        let mut out = Vec::new();
        list(&home, None, false, &mut out).await.unwrap();
        assert_eq!(out, b"foo\n");
    }

    #[test]
    fn test_key_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let home = AppHome::new(tmp.path());
        let mut first = Vec::new();
        key(&home, &mut first).unwrap();
        let mut second = Vec::new();
        key(&home, &mut second).unwrap();
        assert_eq!(first, second);
        assert!(String::from_utf8(first).unwrap().starts_with("Public key: "));
    }
}
