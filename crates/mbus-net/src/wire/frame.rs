//! Length-prefixed framing for bridge connections.

use super::{PacketError, MAX_FRAME};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Write one frame: big-endian `u32` length, then the packet bytes.
pub async fn write_frame<W>(writer: &mut W, packet: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if packet.len() > MAX_FRAME {
        return Err(too_large(packet.len()));
    }
    let len = packet.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(packet).await?;
    writer.flush().await
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME {
        return Err(too_large(len));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

fn too_large(size: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        PacketError::TooLarge {
            size,
            max: MAX_FRAME,
        },
    )
}
