//! Git subprocess wrappers.

use crate::negotiate::Negotiation;
use crate::pktline::{PktLineReader, PktLineWriter};
use crate::{GitError, Result};
use pear_types::{ObjectId, RefTable, MIRROR_REMOTE};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{Output, Stdio};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

/// Runs git on behalf of the daemon, the CLI and the remote helper.
///
/// Commands run in `work_dir` when set, otherwise in the process's current
/// directory (which is where git starts remote helpers).
#[derive(Debug, Clone)]
pub struct GitBridge {
    program: PathBuf,
    work_dir: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
}

impl Default for GitBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl GitBridge {
    /// Bridge using `git` from `PATH` in the current directory.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
            work_dir: None,
            envs: Vec::new(),
        }
    }

    /// Bridge running commands inside `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            program: PathBuf::from("git"),
            work_dir: Some(dir.into()),
            envs: Vec::new(),
        }
    }

    /// Sets `key` in the environment of every git command, and so of the
    /// remote helpers git starts.
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .envs(self.envs.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn run(&self, name: &str, mut cmd: Command) -> Result<Output> {
        tracing::debug!(command = %name, "running git");
        let output = cmd.output().await?;
        check(name, output)
    }

    // ==================== Refs ====================

    /// Lists refs of `target` (a path or URL) via `git ls-remote`.
    pub async fn list_refs(&self, target: &str) -> Result<RefTable> {
        let output = self.run("ls-remote", self.command(["ls-remote", target])).await?;
        parse_ls_remote(&String::from_utf8_lossy(&output.stdout))
    }

    /// Commit at `HEAD`.
    pub async fn get_commit(&self) -> Result<String> {
        let output = self.run("rev-parse", self.command(["rev-parse", "HEAD"])).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Name of the checked out branch.
    pub async fn get_current_branch(&self) -> Result<String> {
        let output = self
            .run("rev-parse", self.command(["rev-parse", "--abbrev-ref", "HEAD"]))
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Resolves `rev` to an object id.
    pub async fn rev_parse(&self, rev: &str) -> Result<ObjectId> {
        let output = self.run("rev-parse", self.command(["rev-parse", rev])).await?;
        Ok(ObjectId::parse(String::from_utf8_lossy(&output.stdout).trim())?)
    }

    // ==================== Pack transfer ====================

    /// Runs `git upload-pack` on `dir` and negotiates a pack for `want`.
    ///
    /// The returned stream starts at the first byte of the pack.
    pub async fn upload_pack(&self, dir: &Path, want: &ObjectId, have: Option<&ObjectId>) -> Result<UploadPack> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("upload-pack")
            .arg(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GitError::Protocol("upload-pack stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GitError::Protocol("upload-pack stdout unavailable".into()))?;
        let stderr = child.stderr.take().map(|mut err| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = err.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut writer = PktLineWriter::new(stdin);
        for pkt in Negotiation::request(want.as_str(), have.map(ObjectId::as_str)) {
            writer.write(&pkt).await?;
        }
        writer.flush().await?;
        drop(writer.into_inner());

        let mut negotiation = Negotiation::new(have.is_some());
        let mut reader = PktLineReader::new(stdout);
        while !negotiation.is_ready() {
            match reader.read().await? {
                Some(pkt) => {
                    negotiation.advance(&pkt)?;
                }
                None => {
                    let stderr = match stderr {
                        Some(task) => task.await.unwrap_or_default(),
                        None => String::new(),
                    };
                    return Err(GitError::Protocol(format!(
                        "upload-pack closed during negotiation: {}",
                        stderr.trim()
                    )));
                }
            }
        }

        tracing::debug!(want = %want, dir = %dir.display(), "upload-pack ready");
        Ok(UploadPack {
            child,
            stdout: reader.into_inner(),
            stderr,
        })
    }

    /// Indexes a pack read from `pack` into the current repository.
    pub async fn unpack_stream<R>(&self, mut pack: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut cmd = self.command(["index-pack", "--stdin", "-v", "--fix-thin"]);
        cmd.stdin(Stdio::piped());
        let mut child = cmd.spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| GitError::Protocol("index-pack stdin unavailable".into()))?;
        let copied = tokio::io::copy(&mut pack, &mut stdin).await;
        drop(stdin);

        let output = child.wait_with_output().await?;
        check("index-pack", output)?;
        let bytes = copied?;
        tracing::debug!(bytes, "pack indexed");
        Ok(())
    }

    // ==================== Repositories ====================

    /// Creates a bare repository at `code_dir`.
    pub async fn create_bare_repo(&self, code_dir: &Path) -> Result<()> {
        let mut cmd = self.command(["init", "--bare"]);
        cmd.env("GIT_DIR", code_dir);
        self.run("init", cmd).await?;
        Ok(())
    }

    /// Adds the `pear` remote pointing at `code_dir`.
    pub async fn add_remote(&self, code_dir: &Path) -> Result<()> {
        let mut cmd = self.command(["remote", "add", MIRROR_REMOTE]);
        cmd.arg(code_dir);
        self.run("remote", cmd).await?;
        Ok(())
    }

    /// URL of the `pear` remote, if configured.
    pub async fn remote_url(&self) -> Result<Option<String>> {
        let output = self
            .command(["remote", "get-url", MIRROR_REMOTE])
            .output()
            .await?;
        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Pushes `branch` to the `pear` remote.
    pub async fn push(&self, branch: &str, force: bool) -> Result<()> {
        let mut args = vec!["push", MIRROR_REMOTE, branch];
        if force {
            args.push("-f");
        }
        self.run("push", self.command(args)).await?;
        Ok(())
    }

    /// Fetches `branch` from `url` into the bare repository at `bare`.
    ///
    /// Returns the combined output of git.
    pub async fn fetch_into_bare(&self, bare: &Path, url: &str, branch: &str, force: bool) -> Result<String> {
        let refspec = format!("{}:{}", branch, branch);
        let mut cmd = self.command(["fetch", url, &refspec]);
        if force {
            cmd.arg("--force");
        }
        cmd.env("GIT_DIR", bare);
        let output = self.run("fetch", cmd).await?;
        Ok(combined(&output))
    }

    /// Deletes `branch` from the bare repository at `bare`.
    pub async fn delete_branch(&self, bare: &Path, branch: &str) -> Result<String> {
        let mut cmd = self.command(["branch", "-D", branch]);
        cmd.env("GIT_DIR", bare);
        let output = self.run("branch", cmd).await?;
        Ok(combined(&output))
    }
}

fn check(name: &str, output: Output) -> Result<Output> {
    if output.status.success() {
        return Ok(output);
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    tracing::debug!(command = %name, stderr = %stderr, "git failed");
    Err(GitError::Exit {
        command: name.to_string(),
        code: output.status.code().unwrap_or(-1),
        stderr,
    })
}

fn combined(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

/// Parses `git ls-remote` output (`<sha>\t<ref>` per line).
pub fn parse_ls_remote(text: &str) -> Result<RefTable> {
    let mut refs = RefTable::new();
    for line in text.lines().filter(|l| !l.is_empty()) {
        let (sha, name) = line
            .split_once('\t')
            .ok_or_else(|| GitError::Protocol(format!("malformed ls-remote line {:?}", line)))?;
        refs.insert(name.to_string(), ObjectId::parse(sha)?);
    }
    Ok(refs)
}

/// Pack stream produced by [`GitBridge::upload_pack`].
pub struct UploadPack {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
}

impl UploadPack {
    /// Waits for upload-pack to exit after the stream was consumed.
    pub async fn finish(mut self) -> Result<()> {
        let status = self.child.wait().await?;
        if status.success() {
            return Ok(());
        }
        let stderr = match self.stderr.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        Err(GitError::Exit {
            command: "upload-pack".to_string(),
            code: status.code().unwrap_or(-1),
            stderr: stderr.trim().to_string(),
        })
    }
}

impl AsyncRead for UploadPack {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl std::fmt::Debug for UploadPack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadPack").field("pid", &self.child.id()).finish_non_exhaustive()
    }
}
