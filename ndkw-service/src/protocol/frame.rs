use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::ProtocolError;

/// Largest request frame the server accepts.
pub const MAX_REQUEST_LEN: usize = 1 << 20;

/// Largest response frame a client accepts (content bytes excluded).
pub const MAX_RESPONSE_LEN: usize = 64 << 20;

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before a new
/// frame started.
pub async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }

    let length = i32::from_le_bytes(prefix);
    let length = usize::try_from(length).map_err(|_| ProtocolError::InvalidFrameLength(length))?;
    if length > limit {
        return Err(ProtocolError::FrameTooLarge { length, limit });
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let length = i32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
        length: payload.len(),
        limit: i32::MAX as usize,
    })?;
    writer.write_all(&length.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}
