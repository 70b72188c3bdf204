//! SSH collaborator
//!
//! A russh server used purely for tunnelling: optional password auth,
//! local forwards (`ssh -L`) and remote forwards (`ssh -R`). Session
//! channels only print a banner and stay open.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nx_core::{bridge, supervisor, Listener};
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodSet, Pty};
use russh_keys::key::KeyPair;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};

/// Written to every session channel that asks for a shell or command
pub const BANNER: &[u8] = b"nx SSH tunneling active\r\n";

/// Idle connections are dropped after this long
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(3600);

/// Per-connection SSH server
pub struct SshService {
    config: Arc<server::Config>,
    password: Arc<str>,
    fingerprint: String,
}

impl SshService {
    /// Generate an ephemeral Ed25519 host key; an empty `password` accepts anyone
    pub fn new(password: impl Into<String>) -> Result<Self> {
        let key = KeyPair::Ed25519(ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng));
        let fingerprint = key
            .clone_public_key()
            .map_err(|e| Error::Configuration(format!("host key: {e}")))?
            .fingerprint();

        let config = server::Config {
            inactivity_timeout: Some(INACTIVITY_TIMEOUT),
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::ZERO),
            keys: vec![key],
            methods: MethodSet::PASSWORD | MethodSet::NONE,
            ..Default::default()
        };

        Ok(Self {
            config: Arc::new(config),
            password: Arc::from(password.into()),
            fingerprint,
        })
    }

    /// SHA-256 fingerprint of the host key
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Whether a password is required
    pub fn requires_password(&self) -> bool {
        !self.password.is_empty()
    }

    /// Run the SSH protocol on one connection until it ends or `token` fires
    #[instrument(skip(self, conn, token), fields(remote = %remote))]
    pub async fn handle<C>(&self, conn: C, remote: SocketAddr, token: CancellationToken) -> Result<()>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let handler = SshSession {
            password: Arc::clone(&self.password),
            remote,
            token: token.child_token(),
            forwards: HashMap::new(),
        };

        let config = Arc::clone(&self.config);
        let session = async move { server::run_stream(config, conn, handler).await?.await };
        tokio::select! {
            _ = token.cancelled() => {
                debug!("SSH connection cancelled");
                Ok(())
            }
            result = session => {
                debug!("SSH connection closed");
                result
            }
        }
    }

    /// Accept SSH connections from `listener` until cancelled
    pub async fn serve<L>(self: Arc<Self>, token: CancellationToken, listener: &L) -> nx_core::Result<()>
    where
        L: Listener + ?Sized,
        L::Conn: AsyncRead + AsyncWrite + Unpin,
    {
        supervisor::run(&token, listener, "ssh", |conn, remote, child| {
            let service = Arc::clone(&self);
            async move { service.handle(conn, remote, child).await }
        })
        .await
    }
}

/// Password check; an empty expected password accepts anything
pub fn password_matches(expected: &str, offered: &str) -> bool {
    expected.is_empty() || expected == offered
}

struct SshSession {
    password: Arc<str>,
    remote: SocketAddr,
    token: CancellationToken,
    forwards: HashMap<(String, u32), CancellationToken>,
}

impl SshSession {
    fn verdict(&self, accepted: bool, user: &str) -> Auth {
        if accepted {
            info!(remote = %self.remote, user, "SSH client authenticated");
            Auth::Accept
        } else {
            warn!(remote = %self.remote, user, "SSH authentication rejected");
            Auth::Reject {
                proceed_with_methods: Some(MethodSet::PASSWORD),
            }
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Relay bytes until either side closes; cancellation is a clean end
async fn splice<A, B>(token: &CancellationToken, a: A, b: B) -> Result<()>
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    match bridge(token, a, b).await {
        Err(e) if e.is_shutdown() => Ok(()),
        result => result.map_err(Error::from),
    }
}

#[async_trait]
impl server::Handler for SshSession {
    type Error = Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth> {
        Ok(self.verdict(self.password.is_empty(), user))
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth> {
        Ok(self.verdict(password_matches(&self.password, password), user))
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool> {
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<()> {
        session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<()> {
        session.channel_success(channel);
        session.data(channel, CryptoVec::from_slice(BANNER));
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<()> {
        session.channel_success(channel);
        session.data(channel, CryptoVec::from_slice(BANNER));
        Ok(())
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool> {
        let Ok(port) = u16::try_from(port_to_connect) else {
            return Ok(false);
        };
        let target = format!("{host_to_connect}:{port}");

        let stream = match TcpStream::connect((host_to_connect, port)).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(remote = %self.remote, target = %target, error = %e, "Local forward dial failed");
                return Ok(false);
            }
        };
        info!(remote = %self.remote, target = %target, "Local forward");

        let token = self.token.child_token();
        tokio::spawn(async move {
            if let Err(e) = splice(&token, channel.into_stream(), stream).await {
                debug!(target = %target, error = %e, "Local forward ended");
            }
        });
        Ok(true)
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        session: &mut Session,
    ) -> Result<bool> {
        let Ok(requested) = u16::try_from(*port) else {
            return Ok(false);
        };
        let host = if address.is_empty() { "0.0.0.0" } else { address };

        let listener = match TcpListener::bind((host, requested)).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(remote = %self.remote, address, port = requested, error = %e, "Remote forward bind failed");
                return Ok(false);
            }
        };
        *port = u32::from(listener.local_addr()?.port());
        info!(remote = %self.remote, address, port = *port, "Remote forward");

        let cancel = self.token.child_token();
        if let Some(previous) = self.forwards.insert((address.to_string(), *port), cancel.clone()) {
            previous.cancel();
        }

        let handle = session.handle();
        let address = address.to_string();
        let bound = *port;
        tokio::spawn(async move {
            let result = supervisor::run(&cancel, &listener, "ssh-forward", |stream, peer, child| {
                let handle = handle.clone();
                let address = address.clone();
                async move {
                    let channel = handle
                        .channel_open_forwarded_tcpip(
                            address,
                            bound,
                            peer.ip().to_string(),
                            u32::from(peer.port()),
                        )
                        .await?;
                    splice(&child, channel.into_stream(), stream).await
                }
            })
            .await;
            if let Err(e) = result {
                debug!(port = bound, error = %e, "Remote forward stopped");
            }
        });
        Ok(true)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut Session,
    ) -> Result<bool> {
        match self.forwards.remove(&(address.to_string(), port)) {
            Some(cancel) => {
                cancel.cancel();
                info!(remote = %self.remote, address, port, "Remote forward cancelled");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
