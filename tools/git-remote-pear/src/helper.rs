//! The remote-helper line protocol.
//!
//! git writes commands on stdin, one per line. `fetch` and `push` commands
//! arrive in batches closed by a blank line. Answers go to stdout; nothing
//! else may be written there.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use pear_node::Method;
use pear_p2p::BlobReader;
use pear_types::{ObjectId, RefTable};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Errors that end the helper with exit code 1.
#[derive(Debug, Error)]
pub enum HelperError {
    /// The peer has not published a pack for a wanted object.
    #[error("no pack for {0}")]
    MissingPack(ObjectId),

    /// The local daemon did not advertise a pushed commit in time.
    #[error("local daemon did not publish {commit} for {dst}, is the daemon running and the repo shared?")]
    NotPublished { dst: String, commit: ObjectId },

    #[error("malformed command: {0}")]
    Protocol(String),

    #[error("remote: {0}")]
    Remote(String),

    #[error("local git: {0}")]
    Local(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HelperError>;

/// Bound on waiting for something a daemon publishes in the background.
#[derive(Debug, Clone, Copy)]
pub struct Patience {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Patience {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            timeout: Duration::from_secs(60),
        }
    }
}

impl Patience {
    /// Polls `ready` until it yields true or the timeout passes.
    pub async fn wait_for<F, Fut>(&self, mut ready: F) -> Result<bool>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            if ready().await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// The peer side: advertised refs, published packs and push requests.
#[async_trait]
pub trait Remote: Send + Sync {
    fn refs(&self) -> &RefTable;

    async fn pack_exists(&self, oid: &ObjectId) -> Result<bool>;

    async fn pack(&self, oid: &ObjectId) -> Result<BlobReader>;

    /// Sends a push-family request; `data` is `<dst>#<commit>`.
    async fn push(&self, method: Method, data: &str) -> Result<String>;
}

/// The local repository git invoked us for.
#[async_trait]
pub trait LocalRepo: Send + Sync {
    async fn unpack(&self, pack: BlobReader) -> Result<()>;

    /// Pushes `src` to `dst` in the local bare mirror.
    async fn push_to_mirror(&self, src: &str, dst: &str, force: bool) -> Result<()>;

    async fn resolve(&self, rev: &str) -> Result<ObjectId>;

    /// True once the local daemon advertises `dst` at `commit` and serves
    /// its pack.
    async fn is_published(&self, dst: &str, commit: &ObjectId) -> Result<bool>;
}

/// One `push` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSpec {
    pub src: String,
    pub dst: String,
    pub force: bool,
}

impl PushSpec {
    /// Parses `[+]<src>:<dst>`.
    pub fn parse(spec: &str) -> Result<Self> {
        let (force, spec) = match spec.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        let (src, dst) = spec
            .split_once(':')
            .filter(|(_, dst)| !dst.is_empty())
            .ok_or_else(|| HelperError::Protocol(format!("push {}", spec)))?;
        Ok(Self {
            src: src.to_string(),
            dst: dst.to_string(),
            force,
        })
    }

    pub fn is_delete(&self) -> bool {
        self.src.is_empty()
    }

    pub fn method(&self) -> Method {
        if self.is_delete() {
            Method::DeleteBranch
        } else if self.force {
            Method::ForcePush
        } else {
            Method::Push
        }
    }
}

#[derive(Debug)]
enum Batch {
    Idle,
    Fetch(Vec<ObjectId>),
    Push(Vec<PushSpec>),
}

impl Batch {
    fn is_idle(&self) -> bool {
        matches!(self, Batch::Idle)
    }

    fn fetch(&mut self, oid: ObjectId) -> Result<()> {
        match self {
            Batch::Idle => *self = Batch::Fetch(vec![oid]),
            Batch::Fetch(wanted) => wanted.push(oid),
            Batch::Push(_) => return Err(HelperError::Protocol("fetch inside a push batch".into())),
        }
        Ok(())
    }

    fn push(&mut self, spec: PushSpec) -> Result<()> {
        match self {
            Batch::Idle => *self = Batch::Push(vec![spec]),
            Batch::Push(specs) => specs.push(spec),
            Batch::Fetch(_) => return Err(HelperError::Protocol("push inside a fetch batch".into())),
        }
        Ok(())
    }
}

/// Runs the conversation with git until it ends.
pub struct Helper<R, L> {
    remote: R,
    local: L,
    patience: Patience,
}

impl<R: Remote, L: LocalRepo> Helper<R, L> {
    pub fn new(remote: R, local: L) -> Self {
        Self {
            remote,
            local,
            patience: Patience::default(),
        }
    }

    pub fn with_patience(mut self, patience: Patience) -> Self {
        self.patience = patience;
        self
    }

    /// Serves commands from `input` until git closes it or a batch completes.
    pub async fn run<I, O>(&self, input: I, mut output: O) -> Result<()>
    where
        I: AsyncBufRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut batch = Batch::Idle;

        while let Some(line) = lines.next_line().await? {
            let line = line.trim_end();
            tracing::trace!(%line, "command");

            if line.is_empty() {
                match std::mem::replace(&mut batch, Batch::Idle) {
                    Batch::Idle => {}
                    Batch::Fetch(wanted) => self.fetch(wanted).await?,
                    Batch::Push(specs) => self.push(specs, &mut output).await?,
                }
                output.write_all(b"\n").await?;
                output.flush().await?;
                return Ok(());
            }

            let (command, args) = line.split_once(' ').unwrap_or((line, ""));
            match command {
                "capabilities" if batch.is_idle() => {
                    output.write_all(b"list\npush\nfetch\n\n").await?;
                }
                "list" if batch.is_idle() => {
                    for (name, oid) in self.remote.refs() {
                        output.write_all(format!("{} {}\n", oid, name).as_bytes()).await?;
                    }
                    output.write_all(b"\n").await?;
                }
                "fetch" => batch.fetch(fetch_target(args)?)?,
                "push" => batch.push(PushSpec::parse(args)?)?,
                _ => tracing::warn!(%line, "unhandled command"),
            }
            output.flush().await?;
        }
        Ok(())
    }

    async fn fetch(&self, wanted: Vec<ObjectId>) -> Result<()> {
        let wanted: BTreeSet<ObjectId> = wanted.into_iter().collect();
        for oid in &wanted {
            if !self.patience.wait_for(|| self.remote.pack_exists(oid)).await? {
                return Err(HelperError::MissingPack(oid.clone()));
            }
        }
        for oid in wanted {
            tracing::debug!(%oid, "fetching pack");
            let pack = self.remote.pack(&oid).await?;
            self.local.unpack(pack).await?;
        }
        Ok(())
    }

    async fn push<O: AsyncWrite + Unpin>(&self, specs: Vec<PushSpec>, output: &mut O) -> Result<()> {
        for spec in specs {
            let reply = match self.push_one(&spec).await {
                Ok(()) => format!("ok {}\n", spec.dst),
                Err(e) => {
                    tracing::warn!(dst = %spec.dst, error = %e, "push refused");
                    format!("error {} {}\n", spec.dst, one_line(&e))
                }
            };
            output.write_all(reply.as_bytes()).await?;
        }
        Ok(())
    }

    async fn push_one(&self, spec: &PushSpec) -> Result<()> {
        let data = if spec.is_delete() {
            spec.dst.clone()
        } else {
            self.local.push_to_mirror(&spec.src, &spec.dst, spec.force).await?;
            let commit = self.local.resolve(&spec.src).await?;
            // the peer fetches from our daemon, which must advertise the new tip first
            let published = self
                .patience
                .wait_for(|| self.local.is_published(&spec.dst, &commit))
                .await?;
            if !published {
                return Err(HelperError::NotPublished {
                    dst: spec.dst.clone(),
                    commit,
                });
            }
            format!("{}#{}", spec.dst, commit)
        };
        let output = self.remote.push(spec.method(), &data).await?;
        tracing::debug!(dst = %spec.dst, %output, "pushed");
        Ok(())
    }
}

fn fetch_target(args: &str) -> Result<ObjectId> {
    let sha = args
        .split_whitespace()
        .next()
        .ok_or_else(|| HelperError::Protocol("fetch without object id".into()))?;
    ObjectId::parse(sha).map_err(|e| HelperError::Protocol(e.to_string()))
}

fn one_line(e: &HelperError) -> String {
    let text = match e {
        HelperError::Remote(msg) | HelperError::Local(msg) => msg.clone(),
        other => other.to_string(),
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
