//! Listener-loop supervisor
//!
//! [`run`] is the accept loop shared by every protocol handler: accept,
//! hand the connection to a fresh task, loop. Shutdown-signature errors end
//! the loop cleanly; anything else is logged and retried after a short pause.

use std::fmt::Display;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{is_shutdown_error, Error, Result};

/// Pause after a transient accept error
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Connection handler failure that can tell a shutdown from a real error
pub trait HandlerError: Display + Send + 'static {
    /// Whether the handler only stopped because its connection was shut down
    fn is_shutdown(&self) -> bool;
}

impl HandlerError for Error {
    fn is_shutdown(&self) -> bool {
        Error::is_shutdown(self)
    }
}

/// Anything that hands out connections one at a time
#[async_trait]
pub trait Listener: Send + Sync {
    /// Connection type produced by [`accept`](Self::accept)
    type Conn: Send + 'static;

    /// Wait for the next connection
    ///
    /// Must return an error matched by [`is_shutdown_error`] once the
    /// listener has been closed.
    async fn accept(&self) -> io::Result<(Self::Conn, SocketAddr)>;
}

#[async_trait]
impl Listener for TcpListener {
    type Conn = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// Accept from `listener` until `token` fires or the listener closes
///
/// Each connection is moved into `handler`, whose future runs on its own
/// task with a child token. The connection is dropped, and so closed, when
/// that future completes. Handler errors are logged with `component` and
/// the remote address and never stop the loop; shutdown errors only at
/// debug level.
///
/// Returns [`Error::Cancelled`] when the token fired and
/// [`Error::ListenerClosed`] when the listener reported the shutdown
/// signature; both satisfy [`Error::is_shutdown`].
pub async fn run<L, H, Fut, E>(
    token: &CancellationToken,
    listener: &L,
    component: &'static str,
    handler: H,
) -> Result<()>
where
    L: Listener + ?Sized,
    H: Fn(L::Conn, SocketAddr, CancellationToken) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    E: HandlerError,
{
    loop {
        let accepted = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((conn, remote)) => {
                debug!(component, remote = %remote, "Accepted connection");
                let handling = handler(conn, remote, token.child_token());
                tokio::spawn(async move {
                    match handling.await {
                        Ok(()) => {}
                        Err(e) if e.is_shutdown() => {
                            debug!(component, remote = %remote, error = %e, "Connection handler stopped by shutdown")
                        }
                        Err(e) => {
                            error!(component, remote = %remote, error = %e, "Connection handler failed")
                        }
                    }
                });
            }
            Err(e) if token.is_cancelled() => {
                debug!(component, error = %e, "Accept interrupted by shutdown");
                return Err(Error::Cancelled);
            }
            Err(e) if is_shutdown_error(&e) => {
                debug!(component, "Listener closed");
                return Err(Error::ListenerClosed);
            }
            Err(e) => {
                warn!(component, error = %e, "Accept failed, retrying");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests;
