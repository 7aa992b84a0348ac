use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    body::{BodyReader, BodyWriter},
    protocol::MAX_CHUNK_SIZE,
};

/// Seals everything read from `plain` onto `wire`, then ends the body and
/// shuts `wire` down. Returns the plaintext byte count.
pub async fn encrypt_copy<R, W>(
    plain: &mut R,
    wire: &mut W,
    body: &mut BodyWriter,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; MAX_CHUNK_SIZE];
    let mut total = 0;
    loop {
        let n = plain.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        body.write(wire, &buf[..n]).await?;
        total += n as u64;
    }
    body.finish(wire).await?;
    wire.shutdown().await?;
    Ok(total)
}

/// Opens the body arriving on `wire` into `plain` until it ends, then shuts
/// `plain` down. Returns the plaintext byte count.
pub async fn decrypt_copy<R, W>(
    wire: &mut R,
    plain: &mut W,
    body: &mut BodyReader,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut total = 0;
    while let Some(data) = body.read_chunk(wire).await? {
        plain.write_all(&data).await?;
        total += data.len() as u64;
    }
    plain.shutdown().await?;
    Ok(total)
}
