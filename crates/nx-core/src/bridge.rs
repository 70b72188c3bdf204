//! Bidirectional byte bridge
//!
//! A [`BridgeSession`] copies bytes both ways between two duplex streams on
//! two tasks and finishes on the first of: either direction ending, or the
//! cancellation token firing. The losing direction is aborted, which drops
//! both streams.

mod stdio;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{BridgeError, Direction, Error, Result};
use crate::socket::LocalSocket;

pub use stdio::bridge_stdio;

type CopyOutcome = (Direction, io::Result<u64>);

/// Two running copy tasks between a remote stream and a local stream
pub struct BridgeSession {
    token: CancellationToken,
    done: mpsc::Receiver<CopyOutcome>,
    tasks: [JoinHandle<()>; 2],
    closed: AtomicBool,
}

impl BridgeSession {
    /// Start copying between `remote` and `local`
    ///
    /// The session listens on a child of `token`, so closing it never
    /// cancels the caller's token.
    pub fn start<R, L>(token: &CancellationToken, remote: R, local: L) -> Self
    where
        R: AsyncRead + AsyncWrite + Send + 'static,
        L: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (tx, done) = mpsc::channel(2);
        let (remote_rd, remote_wr) = tokio::io::split(remote);
        let (local_rd, local_wr) = tokio::io::split(local);

        let tasks = [
            spawn_copy(Direction::Inbound, remote_rd, local_wr, tx.clone()),
            spawn_copy(Direction::Outbound, local_rd, remote_wr, tx),
        ];

        Self {
            token: token.child_token(),
            done,
            tasks,
            closed: AtomicBool::new(false),
        }
    }

    /// Wait for the first terminating condition, then close the session
    ///
    /// Returns `Ok(())` on clean EOF, [`Error::Cancelled`] when the token
    /// fired first and [`BridgeError::Copy`] when a direction failed.
    pub async fn wait(&mut self) -> Result<()> {
        let outcome = tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            first = self.done.recv() => match first {
                Some((direction, Ok(bytes))) => {
                    debug!(%direction, bytes, "Bridge direction reached EOF");
                    Ok(())
                }
                Some((direction, Err(source))) => {
                    Err(BridgeError::Copy { direction, source }.into())
                }
                None => Ok(()),
            },
        };

        self.close();
        outcome
    }

    /// Abort both copy tasks, dropping both streams; safe to call repeatedly
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in &self.tasks {
            task.abort();
        }
        self.token.cancel();
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_copy<R, W>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
    done: mpsc::Sender<CopyOutcome>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let result = tokio::io::copy(&mut reader, &mut writer).await;
        if result.is_ok() {
            let _ = writer.shutdown().await;
        }
        trace!(%direction, ok = result.is_ok(), "Copy finished");
        let _ = done.send((direction, result)).await;
    })
}

/// Bridge two established streams until one side finishes or `token` fires
pub async fn bridge<R, L>(token: &CancellationToken, remote: R, local: L) -> Result<()>
where
    R: AsyncRead + AsyncWrite + Send + 'static,
    L: AsyncRead + AsyncWrite + Send + 'static,
{
    BridgeSession::start(token, remote, local).wait().await
}

/// Accept the single peer of `socket`, then bridge it to `remote`
///
/// The socket is closed and its file removed when this returns, whatever the
/// outcome. Accept failures surface as [`BridgeError::Accept`].
pub async fn bridge_local<R>(token: &CancellationToken, remote: R, mut socket: LocalSocket) -> Result<()>
where
    R: AsyncRead + AsyncWrite + Send + 'static,
{
    let local = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(Error::Cancelled),
        accepted = socket.accept() => accepted.map_err(BridgeError::Accept)?,
    };
    debug!(socket = %socket.path().display(), "Pane client connected");

    bridge(token, remote, local).await
}
