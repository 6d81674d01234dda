//! JSON-RPC framing codec.
//!
//! Frames are `Content-Length: N\r\n\r\n{json}` where `N` is the byte length
//! of the UTF-8 body. [`FrameReader`] and [`FrameWriter`] do async reading and
//! writing of framed messages.
//!
//! A malformed frame is not fatal: the reader reports it as
//! [`Frame::Empty`] and the next call starts at the following header block.
//! Only the end of the stream (or an I/O failure) stops decoding.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// The only header the protocol requires. Matched case-sensitively.
const CONTENT_LENGTH: &str = "Content-Length";

/// Which error class a malformed frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameErrorKind {
    /// Header block problem: missing, unparsable, or oversized length.
    Framing,
    /// The body was read but is not JSON.
    Protocol,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value {0:?}")]
    InvalidContentLength(String),
    #[error("Content-Length {0} exceeds maximum {MAX_FRAME_BYTES}")]
    Oversized(usize),
    #[error("frame body is not valid JSON")]
    InvalidJson(#[source] serde_json::Error),
}

impl FrameError {
    #[must_use]
    pub fn kind(&self) -> FrameErrorKind {
        match self {
            Self::MissingContentLength | Self::InvalidContentLength(_) | Self::Oversized(_) => {
                FrameErrorKind::Framing
            }
            Self::InvalidJson(_) => FrameErrorKind::Protocol,
        }
    }
}

/// One decoded unit from the wire.
#[derive(Debug)]
pub enum Frame {
    Message(serde_json::Value),
    /// A frame was consumed but yielded nothing usable.
    Empty(FrameError),
}

/// Encode a message as a complete frame: header block followed by body.
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_vec(message)?;
    let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());
    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn parse_content_length(value: &str) -> Result<usize, FrameError> {
    let value = value.trim();
    match value.parse::<i64>() {
        Ok(len) if len > 0 => {
            usize::try_from(len).map_err(|_| FrameError::InvalidContentLength(value.to_string()))
        }
        _ => Err(FrameError::InvalidContentLength(value.to_string())),
    }
}

/// Reads JSON-RPC frames from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on EOF at a frame boundary (peer closed the stream).
    /// Returns `Err` when the stream fails or ends inside a frame.
    pub async fn read_frame(&mut self) -> io::Result<Option<Frame>> {
        let content_length = match self.read_headers().await? {
            Some(Ok(len)) => len,
            Some(Err(e)) => return Ok(Some(Frame::Empty(e))),
            None => return Ok(None),
        };

        if content_length > MAX_FRAME_BYTES {
            self.discard(content_length).await?;
            return Ok(Some(Frame::Empty(FrameError::Oversized(content_length))));
        }

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await?;

        Ok(Some(match serde_json::from_slice(&body) {
            Ok(value) => Frame::Message(value),
            Err(e) => Frame::Empty(FrameError::InvalidJson(e)),
        }))
    }

    /// Parse headers until the empty line separator.
    ///
    /// Returns `None` on EOF before any header byte.
    async fn read_headers(&mut self) -> io::Result<Option<Result<usize, FrameError>>> {
        let mut content_length: Option<Result<usize, FrameError>> = None;
        let mut line = Vec::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self.reader.read_until(b'\n', &mut line).await?;

            if bytes_read == 0 {
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected EOF while reading headers",
                ));
            }
            saw_any_header_bytes = true;

            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                break;
            }

            if let Some((key, value)) = trimmed.split_once(':')
                && key == CONTENT_LENGTH
            {
                content_length = Some(parse_content_length(value));
            }
            // Ignore other headers (e.g. Content-Type)
        }

        Ok(Some(
            content_length.unwrap_or(Err(FrameError::MissingContentLength)),
        ))
    }

    async fn discard(&mut self, len: usize) -> io::Result<()> {
        let expected = len as u64;
        let copied =
            tokio::io::copy(&mut (&mut self.reader).take(expected), &mut tokio::io::sink()).await?;
        if copied < expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unexpected EOF while skipping oversized frame",
            ));
        }
        Ok(())
    }
}

/// Writes JSON-RPC frames to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one frame and flush it.
    pub async fn write_frame<T: Serialize + ?Sized>(&mut self, msg: &T) -> io::Result<()> {
        let frame = encode(msg).map_err(io::Error::other)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await
    }

    /// Write raw bytes as-is. Used to exercise peers with malformed input.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    /// Close the write half so the peer observes EOF.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
