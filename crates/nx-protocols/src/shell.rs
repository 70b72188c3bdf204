//! Shell session orchestrator
//!
//! Every SHELL-classified connection gets a private Unix socket and a new
//! tmux window. The pane runs a bridging client against the socket, and the
//! TCP connection is bridged to whichever peer connects to it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nx_core::{bridge_local, supervisor, Listener, ShutdownController, SocketManager};
use nx_plugins::{ExecMode, PluginManager};
use nx_tmux::{PaneHandle, TerminalMultiplexer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};

/// Default tmux session for shell windows
pub const DEFAULT_SESSION: &str = "nx";

/// Default pause between opening a pane and typing into it
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Placeholder replaced by the quoted socket path in a bridge command
pub const SOCKET_PLACEHOLDER: &str = "{socket}";

/// Shell orchestrator settings
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// tmux session that receives one window per connection
    pub session: String,
    /// Delay before environment injection
    pub settle_delay: Duration,
    /// Plugins to run against every new pane, in order
    pub scripts: Vec<String>,
    /// How plugin failures are handled
    pub exec_mode: ExecMode,
    /// `host:port` exported to the remote shell as `ME` and proxy variables
    pub callback_addr: String,
    /// Pane command template; must contain [`SOCKET_PLACEHOLDER`]
    pub bridge_command: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            session: DEFAULT_SESSION.to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            scripts: Vec::new(),
            exec_mode: ExecMode::BestEffort,
            callback_addr: "127.0.0.1:8443".to_string(),
            bridge_command: default_bridge_command(),
        }
    }
}

/// `'<current executable>' bridge {socket}`
#[must_use]
pub fn default_bridge_command() -> String {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("nx"));
    format!("{} bridge {SOCKET_PLACEHOLDER}", shell_quote(&exe.to_string_lossy()))
}

/// Wrap `value` in single quotes for a POSIX shell
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Expand a bridge command template for `socket`
#[must_use]
pub fn render_bridge_command(template: &str, socket: &Path) -> String {
    template.replace(SOCKET_PLACEHOLDER, &shell_quote(&socket.to_string_lossy()))
}

/// Environment line typed into every new pane
#[must_use]
pub fn env_command(addr: &str) -> String {
    format!(
        " export ME={addr} all_proxy=http://{addr} http_proxy=http://{addr} https_proxy=http://{addr}"
    )
}

/// One live reverse shell and the pane presenting it
#[derive(Debug, Clone)]
pub struct ShellSession {
    /// Owning tmux session
    pub session: String,
    /// Window created for this connection
    pub pane: PaneHandle,
    /// Local socket the pane client connects to
    pub socket: PathBuf,
    /// Plugins queued for this pane
    pub scripts: Vec<String>,
}

/// Turns shell connections into tmux windows
pub struct ShellOrchestrator {
    config: ShellConfig,
    terminal: Option<Arc<dyn TerminalMultiplexer>>,
    sockets: Option<Arc<SocketManager>>,
    plugins: Option<PluginManager>,
    shutdown: Option<Arc<ShutdownController>>,
}

impl ShellOrchestrator {
    /// Create an orchestrator with no collaborators attached
    pub fn new(config: ShellConfig) -> Self {
        Self {
            config,
            terminal: None,
            sockets: None,
            plugins: None,
            shutdown: None,
        }
    }

    /// Attach the terminal multiplexer (required)
    pub fn with_terminal(mut self, terminal: Arc<dyn TerminalMultiplexer>) -> Self {
        self.terminal = Some(terminal);
        self
    }

    /// Attach the socket manager (required)
    pub fn with_sockets(mut self, sockets: Arc<SocketManager>) -> Self {
        self.sockets = Some(sockets);
        self
    }

    /// Attach the plugin manager used for post-connect scripts
    pub fn with_plugins(mut self, plugins: PluginManager) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// Register sessions with a shutdown controller so it can drain them
    pub fn with_shutdown(mut self, shutdown: Arc<ShutdownController>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Current settings
    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Run one shell connection until its bridge ends
    ///
    /// Errors before the pane exists abort the session and are returned.
    /// Environment and plugin failures afterwards are logged only, and so is
    /// a failed bridge.
    #[instrument(skip(self, conn, token), fields(remote = %remote))]
    pub async fn handle<C>(&self, conn: C, remote: SocketAddr, token: CancellationToken) -> Result<()>
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
    {
        let _guard = match &self.shutdown {
            Some(shutdown) => {
                let guard = shutdown.register_task();
                if guard.is_cancelled() {
                    debug!("Shutting down, not opening a pane");
                    return Ok(());
                }
                Some(guard)
            }
            None => None,
        };

        let terminal = self
            .terminal
            .as_ref()
            .ok_or_else(|| Error::Configuration("terminal multiplexer not initialized".into()))?;
        let sockets = self
            .sockets
            .as_ref()
            .ok_or_else(|| Error::Configuration("socket manager not initialized".into()))?;

        let path = sockets.generate_temp_path()?;
        let socket = sockets.create_listener(&path)?;

        let bridge_token = token.clone();
        let finished = CancellationToken::new();
        let bridge_finished = finished.clone();
        let bridge = AbortOnDropHandle::new(tokio::spawn(async move {
            let _finished = bridge_finished.drop_guard();
            bridge_local(&bridge_token, conn, socket).await
        }));

        let session = self.open_pane(terminal.as_ref(), &path).await?;
        info!(
            session = %session.session,
            pane = %session.pane.target(),
            socket = %path.display(),
            "Shell session opened"
        );

        self.prepare_pane(terminal.as_ref(), &session, &token, &finished)
            .await;

        match bridge.await {
            Ok(Ok(())) => info!(pane = %session.pane.target(), "Shell session closed"),
            Ok(Err(e)) if e.is_shutdown() => {
                debug!(pane = %session.pane.target(), "Shell session cancelled")
            }
            Ok(Err(e)) => warn!(pane = %session.pane.target(), error = %e, "Shell bridge failed"),
            Err(e) => warn!(pane = %session.pane.target(), error = %e, "Shell bridge task failed"),
        }
        Ok(())
    }

    async fn open_pane(&self, terminal: &dyn TerminalMultiplexer, socket: &Path) -> Result<ShellSession> {
        let name = socket
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "shell".to_string());
        let pane = terminal.new_window(&self.config.session, &name).await?;

        let command = render_bridge_command(&self.config.bridge_command, socket);
        terminal.send_keys(&pane.target(), &format!(" {command}")).await?;

        Ok(ShellSession {
            session: self.config.session.clone(),
            pane,
            socket: socket.to_path_buf(),
            scripts: self.config.scripts.clone(),
        })
    }

    /// Type the environment and post-connect scripts into the new pane
    ///
    /// Stops as soon as `finished` fires: once the bridge is gone the pane
    /// is back at the operator's local shell and must not receive keys.
    async fn prepare_pane(
        &self,
        terminal: &dyn TerminalMultiplexer,
        session: &ShellSession,
        token: &CancellationToken,
        finished: &CancellationToken,
    ) {
        let target = session.pane.target();
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = finished.cancelled() => {
                debug!(pane = %target, "Bridge ended before pane setup, skipping injection");
                return;
            }
            _ = tokio::time::sleep(self.config.settle_delay) => {}
        }

        if let Err(e) = terminal
            .send_keys(&target, &env_command(&self.config.callback_addr))
            .await
        {
            warn!(pane = %target, error = %e, "Environment injection failed");
        }

        if session.scripts.is_empty() {
            return;
        }
        let Some(plugins) = &self.plugins else {
            warn!(pane = %target, "Scripts requested but no plugin manager configured");
            return;
        };

        if finished.is_cancelled() {
            debug!(pane = %target, "Bridge ended, skipping plugins");
            return;
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            _ = finished.cancelled() => debug!(pane = %target, "Bridge ended, plugins stopped"),
            result = plugins.execute_all(&session.scripts, &target, self.config.exec_mode) => {
                match result {
                    Ok(summary) if summary.failed.is_empty() => {
                        debug!(pane = %target, completed = summary.completed.len(), "Plugins finished")
                    }
                    Ok(summary) => warn!(
                        pane = %target,
                        completed = summary.completed.len(),
                        failed = summary.failed.len(),
                        "Some plugins failed"
                    ),
                    Err(e) => warn!(pane = %target, error = %e, "Plugin execution aborted"),
                }
            }
        }
    }

    /// Accept shell connections from `listener` until cancelled
    pub async fn serve<L>(self: Arc<Self>, token: CancellationToken, listener: &L) -> nx_core::Result<()>
    where
        L: Listener + ?Sized,
        L::Conn: AsyncRead + AsyncWrite,
    {
        supervisor::run(&token, listener, "shell", |conn, remote, child| {
            let orchestrator = Arc::clone(&self);
            async move { orchestrator.handle(conn, remote, child).await }
        })
        .await
    }
}
