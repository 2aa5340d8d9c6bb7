//! Byte pump between a public client and its tunneled stream

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, split};
use tracing::debug;

const COPY_BUF_SIZE: usize = 16 * 1024;

/// PipeStats counts the bytes moved in each direction of a pairing
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipeStats {
    pub a_to_b: u64,
    pub b_to_a: u64,
}

/// pipe copies bytes between two legs in both directions. The first
/// direction to hit EOF or an error ends the pairing: both legs are shut
/// down and dropped, which unblocks the opposite direction.
pub async fn pipe<A, B>(a: A, b: B) -> PipeStats
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (mut a_read, mut a_write) = split(a);
    let (mut b_read, mut b_write) = split(b);
    let mut stats = PipeStats::default();

    let finished = tokio::select! {
        r = copy_counted(&mut a_read, &mut b_write, &mut stats.a_to_b) => r,
        r = copy_counted(&mut b_read, &mut a_write, &mut stats.b_to_a) => r,
    };

    if let Err(e) = finished {
        debug!("pipe ended on error: {e}");
    }

    let _ = a_write.shutdown().await;
    let _ = b_write.shutdown().await;

    stats
}

/// copy_counted copies until EOF, keeping `copied` current so the count
/// survives the future being dropped mid-copy
async fn copy_counted<R, W>(reader: &mut R, writer: &mut W, copied: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *copied += n as u64;
    }
}
