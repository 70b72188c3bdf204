//! Configuration validation
//!
//! Startup checks that turn a loaded [`AppConfig`] into values the server
//! can use directly. Anything rejected here is a configuration error and
//! stops the process before the listener is bound.

use std::net::{IpAddr, SocketAddr};

use nx_core::{Error, Result};
use nx_protocols::shell::SOCKET_PLACEHOLDER;

use super::config::AppConfig;

/// Plugin run by the legacy `--auto` flag
pub const AUTO_SCRIPT: &str = "auto";

/// Settings derived from a valid configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    /// Listen address; its `Display` form (`[::1]:8443` for IPv6) is also
    /// the callback and local-authority address
    pub bind: SocketAddr,
    /// Post-connect scripts, `--auto` already folded in
    pub scripts: Vec<String>,
}

/// Check `config` and derive the bind address and script list
pub fn validate_config(config: &AppConfig) -> Result<Validated> {
    let ip: IpAddr = config.server.host.parse().map_err(|_| {
        Error::Configuration(format!(
            "invalid interface address '{}'",
            config.server.host
        ))
    })?;
    if config.server.port == 0 {
        return Err(Error::Configuration("port must be between 1 and 65535".into()));
    }
    if config.server.detect_timeout_ms == 0 {
        return Err(Error::Configuration("detect timeout must be positive".into()));
    }

    let target = &config.shell.target;
    if target.is_empty() || target.contains(|c: char| c == ':' || c == '.') {
        return Err(Error::Configuration(format!(
            "invalid tmux session name '{target}'"
        )));
    }

    if let Some(command) = &config.shell.bridge_command {
        if !command.contains(SOCKET_PLACEHOLDER) {
            return Err(Error::Configuration(format!(
                "bridge command must contain {SOCKET_PLACEHOLDER}"
            )));
        }
    }

    if let Some(dir) = &config.http.serve_dir {
        if !dir.is_dir() {
            return Err(Error::Configuration(format!(
                "serve directory {} does not exist",
                dir.display()
            )));
        }
    }

    Ok(Validated {
        bind: SocketAddr::new(ip, config.server.port),
        scripts: requested_scripts(&config.shell.exec, config.shell.auto),
    })
}

/// Split a comma-separated script list, putting `auto` first when requested
pub fn requested_scripts(exec: &str, auto: bool) -> Vec<String> {
    let mut scripts: Vec<String> = exec
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if auto && !scripts.iter().any(|s| s == AUTO_SCRIPT) {
        scripts.insert(0, AUTO_SCRIPT.to_string());
    }
    scripts
}
