//! Server initialization and main run loop
//!
//! Wires the dispatcher to the shell, HTTP and SSH handlers and runs them
//! until SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use nx_core::{wait_for_shutdown_signal, ShutdownController, SocketManager};
use nx_mux::{Dispatcher, DispatcherConfig, ProtocolClass};
use nx_plugins::{ExecMode, PluginManager};
use nx_protocols::shell::default_bridge_command;
use nx_protocols::{HttpConfig, HttpService, ShellConfig, ShellOrchestrator, SshService};
use nx_tmux::{TerminalMultiplexer, TmuxClient};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::config::AppConfig;
use super::validation::validate_config;

/// How long component tasks get to finish after shutdown
const COMPONENT_DRAIN: Duration = Duration::from_secs(5);

/// Plugin manager for `config`, rooted at the configured or default directory
pub fn plugin_manager(config: &AppConfig, terminal: Arc<dyn TerminalMultiplexer>) -> PluginManager {
    PluginManager::new(terminal)
        .with_dir(
            config
                .shell
                .plugin_dir
                .clone()
                .unwrap_or_else(PluginManager::default_dir),
        )
        .with_line_delay(config.shell.settle_delay())
        .with_script_timeout(config.shell.script_timeout())
}

/// Run the server
pub async fn run(config: AppConfig) -> Result<()> {
    info!("Starting nx v{}", env!("CARGO_PKG_VERSION"));

    let validated = validate_config(&config).context("Invalid configuration")?;

    let tmux = TmuxClient::new();
    if !tmux.is_available().await {
        bail!("tmux is not installed or not in PATH");
    }
    let terminal: Arc<dyn TerminalMultiplexer> = Arc::new(tmux);
    if terminal
        .ensure_session(&config.shell.target)
        .await
        .context("Failed to initialize tmux session")?
    {
        info!(session = %config.shell.target, "Created tmux session");
    }

    let sockets = Arc::new(SocketManager::with_default_dir());
    sockets.init().context("Failed to create socket directory")?;
    debug!(dir = %sockets.socket_dir().display(), "Socket directory ready");

    let plugins = plugin_manager(&config, Arc::clone(&terminal));
    plugins
        .validate(&validated.scripts)
        .context("Requested plugin is not installed")?;
    if !validated.scripts.is_empty() {
        info!(scripts = ?validated.scripts, "Post-connect scripts enabled");
    }

    let shutdown = ShutdownController::new();

    let mut dispatcher = Dispatcher::bind(
        validated.bind,
        DispatcherConfig {
            detect_timeout: config.server.detect_timeout(),
            ..DispatcherConfig::default()
        },
    )
    .await
    .context("Failed to bind listener")?;
    info!(addr = %dispatcher.local_addr()?, "Listening");

    let shell = Arc::new(
        ShellOrchestrator::new(ShellConfig {
            session: config.shell.target.clone(),
            settle_delay: config.shell.settle_delay(),
            scripts: validated.scripts.clone(),
            exec_mode: if config.shell.fail_fast {
                ExecMode::FailFast
            } else {
                ExecMode::BestEffort
            },
            callback_addr: validated.bind.to_string(),
            bridge_command: config
                .shell
                .bridge_command
                .clone()
                .unwrap_or_else(default_bridge_command),
        })
        .with_terminal(Arc::clone(&terminal))
        .with_sockets(Arc::clone(&sockets))
        .with_plugins(plugins)
        .with_shutdown(Arc::clone(&shutdown)),
    );

    let http = Arc::new(
        HttpService::new(HttpConfig {
            serve_dir: config.http.serve_dir.clone(),
            server_addr: validated.bind.to_string(),
            proxy_timeout: Duration::from_secs(config.http.proxy_timeout_secs),
        })
        .context("Failed to set up HTTP handler")?,
    );

    let mut tasks = JoinSet::new();

    let shell_listener = dispatcher.listen(ProtocolClass::Shell);
    let token = shutdown.token();
    tasks.spawn(async move { shell.serve(token, &shell_listener).await });

    let http_listener = dispatcher.listen(ProtocolClass::Http);
    let token = shutdown.token();
    tasks.spawn(async move { http.serve(token, &http_listener).await });

    if config.ssh.enabled {
        let ssh = Arc::new(
            SshService::new(config.ssh.password.clone())
                .context("Failed to set up SSH handler")?,
        );
        info!(
            fingerprint = %ssh.fingerprint(),
            password = ssh.requires_password(),
            "SSH tunnelling enabled"
        );
        let ssh_listener = dispatcher.listen(ProtocolClass::Ssh);
        let token = shutdown.token();
        tasks.spawn(async move { ssh.serve(token, &ssh_listener).await });
    } else {
        info!("SSH disabled; SSH connections will be closed");
    }

    tasks.spawn(dispatcher.serve(shutdown.token()));

    tokio::select! {
        signal = wait_for_shutdown_signal() => {
            if let Err(e) = signal {
                warn!(error = %e, "Signal handling failed, shutting down");
            }
        }
        Some(finished) = tasks.join_next() => {
            match finished {
                Ok(Err(e)) if !e.is_shutdown() => error!(error = %e, "Component stopped unexpectedly"),
                Ok(_) => warn!("Component stopped, shutting down"),
                Err(e) => error!(error = %e, "Component task panicked"),
            }
        }
    }

    shutdown.shutdown().await;

    let drained = tokio::time::timeout(COMPONENT_DRAIN, async {
        while let Some(finished) = tasks.join_next().await {
            match finished {
                Ok(Err(e)) if !e.is_shutdown() => warn!(error = %e, "Component stopped with error"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Component task failed"),
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!("Component shutdown timeout, aborting");
        tasks.abort_all();
    }

    sockets.cleanup().context("Failed to remove socket directory")?;
    info!("nx shutdown complete");
    Ok(())
}
