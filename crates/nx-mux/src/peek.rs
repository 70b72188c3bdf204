//! Peekable connection decorator
//!
//! Bytes pulled in for classification stay in an internal buffer and are
//! replayed to the first reads, so the handler sees the stream exactly as
//! the client sent it.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

/// Largest single read issued while peeking
const FILL_CHUNK: usize = 1024;

/// A stream wrapper that can look ahead without consuming
#[derive(Debug)]
pub struct PeekableConn<S> {
    inner: S,
    buf: Vec<u8>,
    pos: usize,
}

impl<S> PeekableConn<S> {
    /// Wrap a stream with an empty look-ahead buffer
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Bytes read from the stream but not yet handed to a reader
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// The wrapped stream
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Split into the wrapped stream and the unread look-ahead bytes
    pub fn into_parts(mut self) -> (S, Vec<u8>) {
        let rest = self.buf.split_off(self.pos);
        (self.inner, rest)
    }
}

impl<S: AsyncRead + Unpin> PeekableConn<S> {
    /// Read up to `max` more bytes into the look-ahead buffer
    ///
    /// Returns the number of bytes added, `0` meaning EOF. Cancel-safe: a
    /// dropped call leaves the buffer untouched.
    pub async fn fill(&mut self, max: usize) -> io::Result<usize> {
        let mut chunk = [0u8; FILL_CHUNK];
        let want = max.clamp(1, FILL_CHUNK);
        let n = self.inner.read(&mut chunk[..want]).await?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Look at the next `n` bytes without consuming them
    ///
    /// Returns fewer than `n` bytes only when the stream hit EOF first.
    pub async fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        while self.buffered().len() < n {
            let missing = n - self.buffered().len();
            if self.fill(missing).await? == 0 {
                break;
            }
        }
        let end = self.buffered().len().min(n);
        Ok(&self.buffered()[..end])
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekableConn<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.pos < this.buf.len() {
            let n = out.remaining().min(this.buf.len() - this.pos);
            out.put_slice(&this.buf[this.pos..this.pos + n]);
            this.pos += n;
            if this.pos == this.buf.len() {
                this.buf = Vec::new();
                this.pos = 0;
            }
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, out)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekableConn<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, data)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
