//! Content-based TLS/plaintext multiplexing
//!
//! The inspector reads the first bytes of a fresh connection to decide
//! whether it opens with a TLS handshake record. The bytes it reads are kept
//! and replayed by [`Prefixed`], so whichever path handles the connection
//! sees the original stream.

use bytes::{Buf, Bytes};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

/// TLS record content type for handshake messages
const HANDSHAKE_RECORD: u8 = 0x16;
/// Major version shared by SSL 3.0 and every TLS release
const TLS_MAJOR_VERSION: u8 = 0x03;
const PREFIX_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tls,
    Plaintext,
}

/// Classify a connection by its leading bytes.
///
/// Anything that is not clearly a TLS handshake, including a prefix that is
/// too short to tell, is plaintext.
pub fn classify(prefix: &[u8]) -> Protocol {
    match prefix {
        [HANDSHAKE_RECORD, TLS_MAJOR_VERSION, ..] => Protocol::Tls,
        _ => Protocol::Plaintext,
    }
}

/// Read the classification prefix from a stream.
///
/// Reads at most two bytes and stops after the first one when it already
/// rules out TLS. End of stream yields whatever was read.
pub async fn inspect<S>(mut stream: S) -> io::Result<(Protocol, Prefixed<S>)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; PREFIX_LEN];
    let mut filled = 0;

    while filled < PREFIX_LEN {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
        if buf[0] != HANDSHAKE_RECORD {
            break;
        }
    }

    let prefix = &buf[..filled];
    let protocol = classify(prefix);
    Ok((
        protocol,
        Prefixed::new(Bytes::copy_from_slice(prefix), stream),
    ))
}

/// A stream that yields a buffered prefix before reading from the inner
/// stream. Writes go straight to the inner stream.
#[derive(Debug)]
pub struct Prefixed<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> Prefixed<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Unread prefix bytes and the inner stream
    pub fn into_parts(self) -> (Bytes, S) {
        (self.prefix, self.inner)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Prefixed<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.prefix.has_remaining() {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix[..n]);
            this.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Prefixed<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
