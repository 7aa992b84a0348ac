use std::{
    io,
    pin::Pin,
    task::{ready, Context, Poll},
};

use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::{
    crypto::{fnv1a32, Aes128CfbDec, Aes128CfbEnc},
    error::{Error, Result},
    protocol::MAX_CHUNK_SIZE,
};

/// Decrypts a header as it is read and keeps the plaintext for the
/// checksum.
///
/// Reads are passed straight through to the inner reader, so nothing past
/// the bytes asked for is consumed.
pub(crate) struct HeaderReader<'a, R: ?Sized> {
    inner: &'a mut R,
    cipher: Aes128CfbDec,
    transcript: Vec<u8>,
}

impl<'a, R: AsyncRead + Unpin + ?Sized> HeaderReader<'a, R> {
    pub(crate) fn new(inner: &'a mut R, cipher: Aes128CfbDec) -> Self {
        Self {
            inner,
            cipher,
            transcript: Vec::with_capacity(64),
        }
    }

    /// Plaintext read so far.
    pub(crate) fn transcript(&self) -> &[u8] {
        &self.transcript
    }
}

impl<R: AsyncRead + Unpin + ?Sized> AsyncRead for HeaderReader<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let start = buf.filled().len();
        ready!(Pin::new(&mut *this.inner).poll_read(cx, buf))?;

        let fresh = &mut buf.filled_mut()[start..];
        this.cipher.decrypt(fresh);
        this.transcript.extend_from_slice(fresh);
        Poll::Ready(Ok(()))
    }
}

/// Encrypting half of a body stream.
pub struct BodyWriter {
    cipher: Aes128CfbEnc,
    chunked: bool,
}

impl BodyWriter {
    pub(crate) fn new(cipher: Aes128CfbEnc, chunked: bool) -> Self {
        Self { cipher, chunked }
    }

    /// Appends the wire form of `data` to `out`. With chunk framing, large
    /// inputs span several chunks and empty input writes nothing.
    pub fn seal(&mut self, data: &[u8], out: &mut Vec<u8>) {
        if !self.chunked {
            let start = out.len();
            out.extend_from_slice(data);
            self.cipher.encrypt(&mut out[start..]);
            return;
        }
        for piece in data.chunks(MAX_CHUNK_SIZE) {
            self.seal_chunk(piece, out);
        }
    }

    /// Appends the end-of-stream marker. Unframed bodies end at EOF and
    /// have no marker.
    pub fn seal_end(&mut self, out: &mut Vec<u8>) {
        if self.chunked {
            self.seal_chunk(&[], out);
        }
    }

    fn seal_chunk(&mut self, data: &[u8], out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(&((4 + data.len()) as u16).to_be_bytes());
        out.extend_from_slice(&fnv1a32(data).to_be_bytes());
        out.extend_from_slice(data);
        self.cipher.encrypt(&mut out[start..]);
    }

    pub async fn write<W>(&mut self, writer: &mut W, data: &[u8]) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = Vec::with_capacity(data.len() + 6);
        self.seal(data, &mut buf);
        writer.write_all(&buf).await
    }

    /// Writes the end marker and flushes.
    pub async fn finish<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = Vec::with_capacity(6);
        self.seal_end(&mut buf);
        writer.write_all(&buf).await?;
        writer.flush().await
    }
}

/// Decrypting half of a body stream.
pub struct BodyReader {
    cipher: Aes128CfbDec,
    chunked: bool,
    done: bool,
}

impl BodyReader {
    pub(crate) fn new(cipher: Aes128CfbDec, chunked: bool) -> Self {
        Self {
            cipher,
            chunked,
            done: false,
        }
    }

    /// Next piece of plaintext, `None` at end of stream.
    pub async fn read_chunk<R>(&mut self, reader: &mut R) -> Result<Option<Vec<u8>>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if self.done {
            return Ok(None);
        }
        if !self.chunked {
            let mut buf = vec![0u8; MAX_CHUNK_SIZE];
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                self.done = true;
                return Ok(None);
            }
            buf.truncate(n);
            self.cipher.decrypt(&mut buf);
            return Ok(Some(buf));
        }

        let mut len = [0u8; 2];
        if reader.read(&mut len[..1]).await? == 0 {
            trace!("body ended at transport EOF");
            self.done = true;
            return Ok(None);
        }
        reader.read_exact(&mut len[1..]).await?;
        self.cipher.decrypt(&mut len);
        let len = u16::from_be_bytes(len) as usize;
        if len < 4 || len - 4 > MAX_CHUNK_SIZE {
            return Err(Error::CorruptedPacket);
        }

        let mut chunk = vec![0u8; len];
        reader.read_exact(&mut chunk).await?;
        self.cipher.decrypt(&mut chunk);
        let data = chunk.split_off(4);
        if chunk[..] != fnv1a32(&data).to_be_bytes() {
            return Err(Error::CorruptedPacket);
        }

        if data.is_empty() {
            self.done = true;
            return Ok(None);
        }
        Ok(Some(data))
    }
}
