//! Key-addressed blob stores ("drives") that carry pack files between peers.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::{P2pError, Result};

/// A boxed blob reader.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Read access to a drive, local or remote.
#[async_trait]
pub trait Drive: Send + Sync {
    /// Hex key identifying the drive.
    fn key(&self) -> &str;

    /// Whether a complete blob exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Opens the blob at `path` for streaming.
    async fn reader(&self, path: &str) -> Result<BlobReader>;
}

/// Key of the drive that `node_key` publishes packs of `repo` into.
pub fn drive_key(node_key: &[u8; 32], repo: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"gitpear-drive");
    hasher.update(node_key);
    hasher.update(repo.as_bytes());
    hex::encode(hasher.finalize())
}

/// Topic under which a key is announced to the swarm.
pub fn discovery_key(key: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"gitpear-discovery");
    hasher.update(key);
    hasher.finalize().into()
}

/// A drive backed by a local directory.
///
/// Writes land in a temporary file that is renamed into place once the
/// copy finishes, so readers never observe a partial blob.
#[derive(Debug, Clone)]
pub struct FsDrive {
    root: PathBuf,
    key: String,
}

impl FsDrive {
    /// Opens (creating if needed) the drive rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, key: impl Into<String>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, key: key.into() })
    }

    /// Directory the drive stores blobs in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let clean = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(P2pError::InvalidMessage(format!("invalid drive path: {}", path)));
        }
        Ok(self.root.join(relative))
    }

    /// Copies everything from `reader` into the blob at `path`, returning
    /// the number of bytes written.
    pub async fn write_from<R>(&self, path: &str, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let target = self.resolve(path)?;
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        tokio::fs::create_dir_all(&parent).await?;

        let temp = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(&parent)?;
        let (file, temp_path) = temp.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let written = tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        temp_path
            .persist(&target)
            .map_err(|e| P2pError::Io(e.error))?;
        tracing::debug!(drive = %self.key, path, bytes = written, "blob stored");
        Ok(written)
    }

    /// Reads at most `max` bytes of the blob at `path`, starting at `offset`.
    ///
    /// An empty result means `offset` is at or past the end of the blob.
    pub async fn read_chunk(&self, path: &str, offset: u64, max: usize) -> Result<Bytes> {
        let mut file = match tokio::fs::File::open(self.resolve(path)?).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(P2pError::NotFound(path.to_string())),
            Err(e) => return Err(e.into()),
        };
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut chunk = Vec::with_capacity(max.min(64 * 1024));
        file.take(max as u64).read_to_end(&mut chunk).await?;
        Ok(Bytes::from(chunk))
    }

    /// Deletes the blob at `path`, if present.
    pub async fn remove(&self, path: &str) -> Result<()> {
        match tokio::fs::remove_file(self.resolve(path)?).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Drive for FsDrive {
    fn key(&self) -> &str {
        &self.key
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(path)?).await?)
    }

    async fn reader(&self, path: &str) -> Result<BlobReader> {
        match tokio::fs::File::open(self.resolve(path)?).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(P2pError::NotFound(path.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_key_depends_on_repo_and_node() {
        let a = drive_key(&[1u8; 32], "foo");
        assert_eq!(a.len(), 64);
        assert_eq!(a, drive_key(&[1u8; 32], "foo"));
        assert_ne!(a, drive_key(&[1u8; 32], "bar"));
        assert_ne!(a, drive_key(&[2u8; 32], "foo"));
        assert_ne!(discovery_key(&[1u8; 32]), [1u8; 32]);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let drive = FsDrive::open(dir.path().join("d"), "k").unwrap();
        assert!(!drive.exists("packs/a.pack").await.unwrap());

        let mut data: &[u8] = b"PACK data";
        let written = drive.write_from("packs/a.pack", &mut data).await.unwrap();
        assert_eq!(written, 9);
        assert!(drive.exists("packs/a.pack").await.unwrap());

        let mut out = Vec::new();
        drive.reader("packs/a.pack").await.unwrap().read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"PACK data");

        assert_eq!(&drive.read_chunk("packs/a.pack", 0, 4).await.unwrap()[..], b"PACK");
        assert_eq!(&drive.read_chunk("packs/a.pack", 5, 100).await.unwrap()[..], b"data");
        assert!(drive.read_chunk("packs/a.pack", 9, 100).await.unwrap().is_empty());
        assert!(drive.read_chunk("packs/a.pack", 50, 100).await.unwrap().is_empty());

        drive.remove("packs/a.pack").await.unwrap();
        drive.remove("packs/a.pack").await.unwrap();
        assert!(!drive.exists("packs/a.pack").await.unwrap());
    }

    #[tokio::test]
    async fn test_partial_write_is_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let drive = FsDrive::open(dir.path(), "k").unwrap();
        let mut failing = failing_reader();
        assert!(drive.write_from("packs/b.pack", &mut failing).await.is_err());
        assert!(!drive.exists("packs/b.pack").await.unwrap());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("packs")).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_missing_blob_and_bad_paths() {
        let dir = tempfile::tempdir().unwrap();
        let drive = FsDrive::open(dir.path(), "k").unwrap();
        assert!(matches!(drive.reader("packs/none.pack").await, Err(P2pError::NotFound(_))));
        assert!(drive.exists("../escape").await.is_err());
        assert!(drive.exists("/etc/passwd").await.is_err());
        assert!(drive.exists("").await.is_err());
    }

    fn failing_reader() -> impl AsyncRead + Unpin {
        ErrAfter { inner: &b"PACK"[..], seen: 0 }
    }

    /// Yields four bytes, then fails as a dropped peer would.
    struct ErrAfter<R> {
        inner: R,
        seen: usize,
    }

    impl<R: AsyncRead + Unpin> AsyncRead for ErrAfter<R> {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if self.seen >= 4 {
                return std::task::Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer went away")));
            }
            let before = buf.filled().len();
            let poll = std::pin::Pin::new(&mut self.inner).poll_read(cx, buf);
            let after = buf.filled().len();
            self.seen += after - before;
            poll
        }
    }
}
