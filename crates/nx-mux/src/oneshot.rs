//! Single-connection listener adapter
//!
//! Lets a handler that serves from a [`Listener`] run against one connection
//! that was already accepted elsewhere. The first accept yields the
//! connection; later accepts park until the connection is dropped or the
//! listener is closed, then report the closed-listener error.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use async_trait::async_trait;
use nx_core::{closed_listener_error, Listener};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::CancellationToken;

/// Listener that yields exactly one connection
pub struct OneShotListener<C> {
    pending: Mutex<Option<(C, SocketAddr)>>,
    closed: CancellationToken,
}

impl<C> OneShotListener<C> {
    /// Wrap an accepted connection
    pub fn new(conn: C, remote: SocketAddr) -> Self {
        Self {
            pending: Mutex::new(Some((conn, remote))),
            closed: CancellationToken::new(),
        }
    }

    /// Close the listener; safe to call any number of times
    pub fn close(&self) {
        self.closed.cancel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

#[async_trait]
impl<C> Listener for OneShotListener<C>
where
    C: Send + 'static,
{
    type Conn = OneShotConn<C>;

    async fn accept(&self) -> io::Result<(OneShotConn<C>, SocketAddr)> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match pending {
            Some((conn, remote)) if !self.closed.is_cancelled() => Ok((
                OneShotConn {
                    inner: conn,
                    closed: self.closed.clone(),
                },
                remote,
            )),
            _ => {
                self.closed.cancelled().await;
                Err(closed_listener_error())
            }
        }
    }
}

/// The connection handed out by [`OneShotListener`]
///
/// Dropping it closes the listener it came from.
#[derive(Debug)]
pub struct OneShotConn<C> {
    inner: C,
    closed: CancellationToken,
}

impl<C> OneShotConn<C> {
    /// The wrapped connection
    pub fn get_ref(&self) -> &C {
        &self.inner
    }
}

impl<C> Drop for OneShotConn<C> {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

impl<C: AsyncRead + Unpin> AsyncRead for OneShotConn<C> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<C: AsyncWrite + Unpin> AsyncWrite for OneShotConn<C> {
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
}
