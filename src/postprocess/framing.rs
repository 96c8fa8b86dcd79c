//! Message framing for post-process backend connections
//!
//! The default wire format terminates every message with `$$$` and carries no
//! length. Length-prefixed framing (4-byte big-endian length, then payload) can be
//! chosen for backends that support it, since a payload containing the
//! terminator would otherwise be cut short.

use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Marks the end of a terminator-framed message
pub const TCP_TERMINATOR: &[u8] = b"$$$";

/// Frames larger than this are rejected
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 1024;

/// How messages are delimited on the backend socket
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Payload followed by [`TCP_TERMINATOR`]
    #[default]
    Terminator,
    /// 4-byte big-endian length followed by the payload
    LengthPrefixed,
}

/// Write one framed message and flush
pub async fn write_frame<W>(writer: &mut W, framing: Framing, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match framing {
        Framing::Terminator => {
            writer.write_all(payload).await?;
            writer.write_all(TCP_TERMINATOR).await?;
        }
        Framing::LengthPrefixed => {
            let len = u32::try_from(payload.len())
                .ok()
                .filter(|len| (*len as usize) <= MAX_FRAME_LEN)
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "frame exceeds maximum length")
                })?;
            writer.write_all(&len.to_be_bytes()).await?;
            writer.write_all(payload).await?;
        }
    }
    writer.flush().await
}

/// Read one framed message and return its payload (terminator stripped)
pub async fn read_frame<R>(reader: &mut R, framing: Framing) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    match framing {
        Framing::Terminator => read_terminated(reader).await,
        Framing::LengthPrefixed => {
            let len = reader.read_u32().await? as usize;
            if len > MAX_FRAME_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame length {len} exceeds maximum"),
                ));
            }
            let mut payload = vec![0; len];
            reader.read_exact(&mut payload).await?;
            Ok(payload)
        }
    }
}

/// Accumulate until the buffer ends with the terminator.
///
/// The check is on the tail of the whole buffer, so a terminator split across
/// reads is still recognized.
async fn read_terminated<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before terminator",
            ));
        }
        buffer.extend_from_slice(&chunk[..n]);

        if buffer.ends_with(TCP_TERMINATOR) {
            buffer.truncate(buffer.len() - TCP_TERMINATOR.len());
            return Ok(buffer);
        }
        if buffer.len() > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unterminated frame exceeds maximum length",
            ));
        }
    }
}
