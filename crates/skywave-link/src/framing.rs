//! Wire framing: `u16_be_length || bytes` on every transport.
//!
//! The length prefix bounds a single frame to 65535 bytes. Framing neither
//! inspects nor validates frame contents — a too-short mesh frame is the
//! codec's problem; the stream stays aligned regardless.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::LinkError;

/// Maximum frame size the length prefix can describe.
pub const MAX_WIRE_FRAME: usize = u16::MAX as usize;

/// Write one length-prefixed frame.
///
/// # Errors
///
/// - [`LinkError::FrameTooLarge`] if `bytes` exceeds the `u16` range
/// - [`LinkError::Io`] on socket failure
pub async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    let len = u16::try_from(bytes.len()).map_err(|_| LinkError::FrameTooLarge(bytes.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// # Errors
///
/// - [`LinkError::Closed`] on clean EOF at a frame boundary
/// - [`LinkError::Io`] on socket failure or mid-frame EOF
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, LinkError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 2];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(LinkError::Closed),
        Err(e) => return Err(LinkError::Io(e)),
    }

    let len = u16::from_be_bytes(len_bytes) as usize;
    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(frame)
}
