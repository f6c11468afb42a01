//! Git pkt-line framing.
//!
//! Every frame starts with a 4 character hex length that counts the prefix
//! itself. Text lines carry a trailing newline that is included in the
//! length. `0000` is a flush frame with no payload.

use crate::{GitError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame length git accepts, prefix included.
pub const MAX_PKT_LEN: usize = 65520;

/// Largest payload of a single data frame.
pub const MAX_PKT_DATA: usize = MAX_PKT_LEN - 4;

/// A pkt-line frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data frame.
    Data(Vec<u8>),
    /// Flush frame (0000).
    Flush,
}

impl PktLine {
    /// Text line; a newline is appended unless already present.
    pub fn line(s: &str) -> Self {
        let mut data = s.as_bytes().to_vec();
        if !s.ends_with('\n') {
            data.push(b'\n');
        }
        Self::Data(data)
    }

    /// Data frame with raw bytes.
    pub fn from_bytes(b: impl Into<Vec<u8>>) -> Self {
        Self::Data(b.into())
    }

    /// Encodes the frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Data(data) => {
                if data.len() > MAX_PKT_DATA {
                    return Err(GitError::InvalidPktLine(format!(
                        "payload of {} bytes exceeds {}",
                        data.len(),
                        MAX_PKT_DATA
                    )));
                }
                let mut out = format!("{:04x}", data.len() + 4).into_bytes();
                out.extend_from_slice(data);
                Ok(out)
            }
            Self::Flush => Ok(b"0000".to_vec()),
        }
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes it used, or `None` if
    /// `buf` does not yet hold a complete frame.
    pub fn decode(buf: &[u8]) -> Result<Option<(PktLine, usize)>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&buf[..4]);
        match frame_len(&prefix)? {
            None => Ok(Some((PktLine::Flush, 4))),
            Some(len) if buf.len() < len => Ok(None),
            Some(len) => Ok(Some((PktLine::Data(buf[4..len].to_vec()), len))),
        }
    }

    /// Returns true if this is a flush frame.
    pub fn is_flush(&self) -> bool {
        matches!(self, Self::Flush)
    }

    /// Returns the payload, or None for a flush.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            Self::Flush => None,
        }
    }

    /// Returns the payload as text without its trailing newline.
    pub fn as_str(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.strip_suffix('\n').unwrap_or(s))
    }
}

/// Parses a length prefix. `None` means flush.
fn frame_len(prefix: &[u8; 4]) -> Result<Option<usize>> {
    if !prefix.iter().all(u8::is_ascii_hexdigit) {
        return Err(GitError::InvalidPktLine(format!(
            "invalid length prefix {:?}",
            String::from_utf8_lossy(prefix)
        )));
    }
    // Only hex digits at this point.
    let text = std::str::from_utf8(prefix).unwrap_or("0000");
    let len = usize::from_str_radix(text, 16)
        .map_err(|_| GitError::InvalidPktLine("invalid length".to_string()))?;

    match len {
        0 => Ok(None),
        1..=3 => Err(GitError::InvalidPktLine(format!("length {} too small", len))),
        n if n > MAX_PKT_LEN => Err(GitError::InvalidPktLine(format!("length {} too large", n))),
        n => Ok(Some(n)),
    }
}

/// Reads frames from an async byte stream.
///
/// Reads exactly one frame at a time and never buffers ahead, so after the
/// last frame of a negotiation the inner reader is positioned at whatever
/// follows (the raw pack for `git-upload-pack`).
pub struct PktLineReader<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> PktLineReader<R> {
    /// Creates a new reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next frame, or `None` at end of stream.
    pub async fn read(&mut self) -> Result<Option<PktLine>> {
        let mut prefix = [0u8; 4];
        match self.reader.read_exact(&mut prefix).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        match frame_len(&prefix)? {
            None => Ok(Some(PktLine::Flush)),
            Some(len) => {
                let mut data = vec![0u8; len - 4];
                self.reader.read_exact(&mut data).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        GitError::InvalidPktLine("truncated frame".to_string())
                    } else {
                        e.into()
                    }
                })?;
                Ok(Some(PktLine::Data(data)))
            }
        }
    }

    /// Reads frames until a flush or end of stream.
    pub async fn read_until_flush(&mut self) -> Result<Vec<PktLine>> {
        let mut frames = Vec::new();
        loop {
            match self.read().await? {
                Some(PktLine::Flush) | None => break,
                Some(pkt) => frames.push(pkt),
            }
        }
        Ok(frames)
    }

    /// Consumes the reader and returns the inner stream.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes frames to an async byte stream.
pub struct PktLineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> PktLineWriter<W> {
    /// Creates a new writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a frame.
    pub async fn write(&mut self, pkt: &PktLine) -> Result<()> {
        self.writer.write_all(&pkt.encode()?).await?;
        Ok(())
    }

    /// Writes a text line.
    pub async fn write_line(&mut self, s: &str) -> Result<()> {
        self.write(&PktLine::line(s)).await
    }

    /// Writes a flush frame.
    pub async fn flush_pkt(&mut self) -> Result<()> {
        self.write(&PktLine::Flush).await
    }

    /// Flushes the underlying writer.
    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
