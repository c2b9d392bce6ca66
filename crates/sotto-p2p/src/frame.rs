//! Length-prefixed framing: 4-byte big-endian payload length, then the
//! payload. Nothing here interprets the payload — tags are the next layer.
//!
//! This replaces the raw-stream `startswith` parsing of earlier designs: a
//! message split across TCP reads, or two coalesced into one, reassembles
//! identically.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::P2pError;

/// Hard cap on a single frame. A length beyond this is a protocol violation
/// and the connection cannot be resynchronized, so the reader gives up on it.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Write one frame. The write side of a connection is serialized by its own
/// mutex, so frames from concurrent tasks never interleave.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), P2pError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(P2pError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean EOF at a frame boundary; EOF in the
/// middle of a frame is an error like any other truncation.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, P2pError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(P2pError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}
