//! Protocol dispatcher
//!
//! Owns the single listening socket. Every accepted connection is wrapped
//! in a [`PeekableConn`], classified from its first bytes and handed to the
//! [`ClassListener`] registered for its class.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nx_core::{closed_listener_error, supervisor, Listener};
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::classify::{classify, inspect, ProtocolClass, Verdict};
use crate::error::{Error, Result};
use crate::peek::PeekableConn;

/// Connection type handed to protocol handlers
pub type MuxConn = PeekableConn<TcpStream>;

/// Smallest accepted look-ahead window
pub const MIN_PEEK: usize = 16;

/// Pending connections queued per class before dispatch waits
const ROUTE_CAPACITY: usize = 64;

type Route = mpsc::Sender<(MuxConn, SocketAddr)>;

/// Classification limits
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How long to wait for the first bytes before falling back
    pub detect_timeout: Duration,
    /// Most bytes read while classifying
    pub max_peek: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            detect_timeout: Duration::from_secs(2),
            max_peek: 4096,
        }
    }
}

/// Single-port connection multiplexer
pub struct Dispatcher {
    listener: TcpListener,
    config: DispatcherConfig,
    routes: HashMap<ProtocolClass, Route>,
}

impl Dispatcher {
    /// Bind the shared listening socket
    pub async fn bind(addr: SocketAddr, config: DispatcherConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Self::from_listener(listener, config)
    }

    /// Dispatch connections from an already bound listener
    pub fn from_listener(listener: TcpListener, config: DispatcherConfig) -> Result<Self> {
        if config.max_peek < MIN_PEEK {
            return Err(Error::InvalidConfig(format!(
                "max_peek must be at least {MIN_PEEK} bytes"
            )));
        }
        if config.detect_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "detect_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            listener,
            config,
            routes: HashMap::new(),
        })
    }

    /// Address the dispatcher is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Register a handler queue for `class`
    ///
    /// A second registration for the same class replaces the first, whose
    /// listener then reports closed.
    pub fn listen(&mut self, class: ProtocolClass) -> ClassListener {
        let (tx, rx) = mpsc::channel(ROUTE_CAPACITY);
        self.routes.insert(class, tx);
        ClassListener {
            class,
            queue: Mutex::new(rx),
        }
    }

    /// Accept and dispatch until `token` fires
    ///
    /// Dropping the routes on return closes every [`ClassListener`] once the
    /// in-flight classifications finish.
    pub async fn serve(self, token: CancellationToken) -> nx_core::Result<()> {
        let Self {
            listener,
            config,
            routes,
        } = self;
        let routes = Arc::new(routes);
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, classes = routes.len(), "Dispatcher listening");
        }

        supervisor::run(&token, &listener, "dispatcher", move |conn, remote, conn_token| {
            let routes = Arc::clone(&routes);
            let config = config.clone();
            async move {
                dispatch(conn, remote, &routes, &config, conn_token).await;
                Ok::<(), Error>(())
            }
        })
        .await
    }
}

#[instrument(skip_all, fields(remote = %remote))]
async fn dispatch(
    conn: TcpStream,
    remote: SocketAddr,
    routes: &HashMap<ProtocolClass, Route>,
    config: &DispatcherConfig,
    token: CancellationToken,
) {
    let mut conn = PeekableConn::new(conn);
    let class = tokio::select! {
        _ = token.cancelled() => return,
        detected = detect(&mut conn, config) => match detected {
            Ok(class) => class,
            Err(e) => {
                debug!(error = %e, "Connection failed during classification");
                return;
            }
        },
    };
    info!(class = %class, peeked = conn.buffered().len(), "Classified connection");

    match routes.get(&class) {
        Some(route) => {
            if route.send((conn, remote)).await.is_err() {
                warn!(class = %class, "Handler stopped accepting, closing connection");
            }
        }
        None => warn!(class = %class, "No handler for protocol, closing connection"),
    }
}

/// Read the first bytes of `conn` until its class is known
///
/// Gives up waiting after `detect_timeout` or at EOF and classifies
/// whatever arrived; a silent connection is a shell.
pub async fn detect<S>(conn: &mut PeekableConn<S>, config: &DispatcherConfig) -> io::Result<ProtocolClass>
where
    S: AsyncRead + Unpin,
{
    let deadline = Instant::now() + config.detect_timeout;
    loop {
        if let Verdict::Decided(class) = inspect(conn.buffered(), config.max_peek) {
            return Ok(class);
        }

        let room = config.max_peek.saturating_sub(conn.buffered().len());
        match tokio::time::timeout_at(deadline, conn.fill(room)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                debug!(peeked = conn.buffered().len(), "Classification timed out");
                break;
            }
        }
    }
    Ok(classify(conn.buffered()))
}

/// Connections of one protocol class
pub struct ClassListener {
    class: ProtocolClass,
    queue: Mutex<mpsc::Receiver<(MuxConn, SocketAddr)>>,
}

#[async_trait]
impl Listener for ClassListener {
    type Conn = MuxConn;

    async fn accept(&self) -> io::Result<(MuxConn, SocketAddr)> {
        self.queue
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| {
                debug!(class = %self.class, "Dispatcher gone, class listener closed");
                closed_listener_error()
            })
    }
}
