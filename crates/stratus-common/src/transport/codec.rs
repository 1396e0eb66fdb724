//! Frame codec.
//!
//! Wire format: `[4-byte length as u32 big-endian] + [JSON data]`. The
//! reader refuses to allocate frames above `max` bytes and reports them as
//! `ResourceExhausted`, which poisons the owning channel.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::{CallRequest, Reply, TransportError, TransportErrorKind};

/// Maximum inbound frame size: 50 MiB.
pub const MAX_RECV_FRAME: usize = 50 * 1024 * 1024;

/// Encodes a request into a single length-prefixed frame.
pub fn encode_request(request: &CallRequest) -> Result<Vec<u8>, TransportError> {
    let body = serde_json::to_vec(request).map_err(|e| {
        TransportError::new(TransportErrorKind::Internal, format!("encoding request: {e}"))
    })?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Writes one pre-encoded frame and flushes.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(frame)
        .await
        .map_err(|e| TransportError::from_io(e, "writing frame"))?;
    writer
        .flush()
        .await
        .map_err(|e| TransportError::from_io(e, "flushing frame"))?;
    Ok(())
}

/// Reads one length-prefixed frame body.
pub async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| TransportError::from_io(e, "reading frame length"))?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max {
        return Err(TransportError::new(
            TransportErrorKind::ResourceExhausted,
            format!("inbound frame of {len} bytes exceeds limit of {max} bytes"),
        ));
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| TransportError::from_io(e, "reading frame body"))?;
    Ok(buf)
}

/// Decodes a server frame body.
pub fn decode_reply(body: &[u8]) -> Result<Reply, TransportError> {
    serde_json::from_slice(body).map_err(|e| {
        TransportError::new(TransportErrorKind::Internal, format!("malformed reply: {e}"))
    })
}
