//! 带字节上限的流式拷贝。

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::COPY_CHUNK_SIZE;

#[derive(Debug)]
pub enum CopyError {
    /// The source offered more than `limit` bytes.
    TooLarge { limit: u64 },
    Io(io::Error),
}

impl From<io::Error> for CopyError {
    fn from(err: io::Error) -> Self {
        CopyError::Io(err)
    }
}

/// Copies `source` into `destination`, writing at most `max_bytes`.
///
/// Reads are capped at the remaining budget so nothing past the limit is ever
/// written. Once the budget is spent a single probe byte is read; if the source
/// still has data the copy fails with [`CopyError::TooLarge`]. Returns the
/// number of bytes written.
pub async fn copy_limited<R, W>(
    source: &mut R,
    destination: &mut W,
    max_bytes: u64,
) -> Result<u64, CopyError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    let mut total_written: u64 = 0;

    while total_written < max_bytes {
        let remaining = max_bytes - total_written;
        let want = usize::try_from(remaining)
            .map(|remaining| remaining.min(buffer.len()))
            .unwrap_or(buffer.len());
        let read = source.read(&mut buffer[..want]).await?;
        if read == 0 {
            destination.flush().await?;
            return Ok(total_written);
        }
        destination.write_all(&buffer[..read]).await?;
        total_written += read as u64;
    }

    if source.read(&mut buffer[..1]).await? > 0 {
        return Err(CopyError::TooLarge { limit: max_bytes });
    }
    destination.flush().await?;
    Ok(total_written)
}
