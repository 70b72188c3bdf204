use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use tracing::info;

use crate::server::config::AppConfig;

/// Flags for `nx serve`; each one overrides the loaded configuration
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Interface address on which to bind
    #[arg(short = 'i', long)]
    pub host: Option<String>,

    /// Port on which to bind
    #[arg(short, long)]
    pub port: Option<u16>,

    /// tmux session name
    #[arg(short, long)]
    pub target: Option<String>,

    /// Directory to serve files from over HTTP/WebDAV
    #[arg(short = 'd', long)]
    pub serve_dir: Option<PathBuf>,

    /// SSH password (empty = no auth)
    #[arg(short, long)]
    pub ssh_pass: Option<String>,

    /// Close SSH connections instead of serving them
    #[arg(long)]
    pub no_ssh: bool,

    /// Plugins to run on every new shell (comma-separated)
    #[arg(long)]
    pub exec: Option<String>,

    /// Attempt to auto-upgrade to a tty (same as --exec auto)
    #[arg(long)]
    pub auto: bool,

    /// Stop at the first failing plugin
    #[arg(long)]
    pub fail_fast: bool,

    /// Delay before typing into a new pane; adjust if --auto is failing
    #[arg(long, value_parser = super::parse_duration)]
    pub sleep: Option<Duration>,

    /// How long to wait for a connection's first bytes
    #[arg(long, value_parser = super::parse_duration)]
    pub detect_timeout: Option<Duration>,

    /// Per-plugin time limit
    #[arg(long, value_parser = super::parse_duration)]
    pub script_timeout: Option<Duration>,

    /// Pane command template; {socket} is replaced by the socket path
    #[arg(long)]
    pub bridge_command: Option<String>,

    /// Install bundled plugins and exit
    #[arg(long)]
    pub install_plugins: bool,
}

impl ServeArgs {
    /// Overlay the flags that were given onto `config`
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(timeout) = self.detect_timeout {
            config.server.detect_timeout_ms = timeout.as_millis() as u64;
        }
        if let Some(target) = &self.target {
            config.shell.target = target.clone();
        }
        if let Some(exec) = &self.exec {
            config.shell.exec = exec.clone();
        }
        if let Some(sleep) = self.sleep {
            config.shell.sleep_ms = sleep.as_millis() as u64;
        }
        if let Some(timeout) = self.script_timeout {
            config.shell.script_timeout_secs = timeout.as_secs();
        }
        if let Some(command) = &self.bridge_command {
            config.shell.bridge_command = Some(command.clone());
        }
        if let Some(dir) = &self.serve_dir {
            config.http.serve_dir = Some(dir.clone());
        }
        if let Some(pass) = &self.ssh_pass {
            config.ssh.password = pass.clone();
        }
        config.shell.auto |= self.auto;
        config.shell.fail_fast |= self.fail_fast;
        if self.no_ssh {
            config.ssh.enabled = false;
        }
    }
}

pub async fn run(args: ServeArgs, verbose: bool) -> anyhow::Result<()> {
    let mut config = crate::server::load_config()?;
    args.apply(&mut config);
    config.verbose |= verbose;
    crate::init_tracing(config.verbose);

    if args.install_plugins {
        let terminal = std::sync::Arc::new(nx_tmux::TmuxClient::new());
        let manager = crate::server::plugin_manager(&config, terminal);
        let installed = manager.install_bundled()?;
        info!(
            installed,
            dir = %manager.plugin_dir().display(),
            "Bundled plugins installed"
        );
        return Ok(());
    }

    crate::server::run(config).await
}
