//! Server configuration types

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub shell: ShellSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub verbose: bool,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long classification waits for a connection's first bytes
    #[serde(default = "default_detect_timeout_ms")]
    pub detect_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            detect_timeout_ms: default_detect_timeout_ms(),
        }
    }
}

impl ServerConfig {
    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8443
}

fn default_detect_timeout_ms() -> u64 {
    2000
}

/// Reverse shell handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellSettings {
    /// tmux session name
    #[serde(default = "default_target")]
    pub target: String,
    /// Settle delay before typing into a new pane
    #[serde(default = "default_sleep_ms")]
    pub sleep_ms: u64,
    /// Comma-separated plugins to run on every new shell
    #[serde(default)]
    pub exec: String,
    /// Legacy alias for `exec = "auto"`
    #[serde(default)]
    pub auto: bool,
    /// Stop at the first failing plugin
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default = "default_script_timeout_secs")]
    pub script_timeout_secs: u64,
    /// Pane command template, `{socket}` is replaced by the socket path
    #[serde(default)]
    pub bridge_command: Option<String>,
    /// Plugin directory override
    #[serde(default)]
    pub plugin_dir: Option<PathBuf>,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            target: default_target(),
            sleep_ms: default_sleep_ms(),
            exec: String::new(),
            auto: false,
            fail_fast: false,
            script_timeout_secs: default_script_timeout_secs(),
            bridge_command: None,
            plugin_dir: None,
        }
    }
}

impl ShellSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }
}

fn default_target() -> String {
    nx_protocols::shell::DEFAULT_SESSION.to_string()
}

fn default_sleep_ms() -> u64 {
    500
}

fn default_script_timeout_secs() -> u64 {
    30
}

/// File serving, uploads and WebDAV
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Serve directory; unset disables file serving
    #[serde(default)]
    pub serve_dir: Option<PathBuf>,
    #[serde(default = "default_proxy_timeout_secs")]
    pub proxy_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            serve_dir: None,
            proxy_timeout_secs: default_proxy_timeout_secs(),
        }
    }
}

fn default_proxy_timeout_secs() -> u64 {
    30
}

/// SSH tunnelling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Empty accepts any credentials
    #[serde(default)]
    pub password: String,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            password: String::new(),
        }
    }
}

fn default_true() -> bool {
    true
}
