//! Length-prefixed framing for encrypted records.
//!
//! Each record travels as a u32 big-endian length followed by the
//! ciphertext. The prefix keeps record boundaries intact across TCP
//! buffering — the sequence-derived nonces require it, since a read that
//! split or coalesced records would desynchronize decoding permanently.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::session::SessionError;

/// Upper bound on a single ciphertext frame.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Write one record frame: length prefix, then the ciphertext.
pub async fn write_frame<W>(writer: &mut W, cipher: &[u8]) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    if cipher.len() > MAX_FRAME_LEN {
        return Err(SessionError::FrameTooLarge { len: cipher.len() });
    }
    let len = cipher.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(cipher).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one record frame.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary (the peer closed
/// the connection). An EOF inside a frame is a transport error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Bytes>, SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(SessionError::FrameTooLarge { len });
    }

    let mut cipher = vec![0u8; len];
    reader.read_exact(&mut cipher).await?;
    Ok(Some(Bytes::from(cipher)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
