//! `tmux` command-line implementation

use std::ffi::OsString;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::target::{PaneHandle, PaneInfo, PaneTarget};
use crate::TerminalMultiplexer;

/// Drives a tmux server through its CLI
#[derive(Debug, Clone)]
pub struct TmuxClient {
    binary: OsString,
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TmuxClient {
    /// Use `tmux` from `PATH`
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary("tmux")
    }

    /// Use a specific tmux binary
    pub fn with_binary(binary: impl Into<OsString>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check that the binary runs at all
    pub async fn is_available(&self) -> bool {
        matches!(
            Command::new(&self.binary).arg("-V").output().await,
            Ok(output) if output.status.success()
        )
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(Error::Unavailable)?;

        if !output.status.success() {
            return Err(Error::Command {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl TerminalMultiplexer for TmuxClient {
    async fn session_exists(&self, session: &str) -> Result<bool> {
        let exact = format!("={session}");
        match self.run(&["has-session", "-t", &exact]).await {
            Ok(_) => Ok(true),
            Err(Error::Command { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_session(&self, session: &str) -> Result<()> {
        self.run(&["new-session", "-d", "-s", session]).await?;
        debug!(session, "Created tmux session");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn new_window(&self, session: &str, name: &str) -> Result<PaneHandle> {
        let target = format!("{session}:");
        let out = self
            .run(&[
                "new-window",
                "-d",
                "-P",
                "-F",
                "#{window_index} #{pane_id}",
                "-t",
                &target,
                "-n",
                name,
            ])
            .await?;

        let (index, pane_id) = out
            .split_once(' ')
            .ok_or_else(|| Error::UnexpectedOutput(out.clone()))?;
        let window = index
            .parse()
            .map_err(|_| Error::UnexpectedOutput(out.clone()))?;

        Ok(PaneHandle {
            session: session.to_string(),
            window,
            name: name.to_string(),
            pane_id: pane_id.to_string(),
        })
    }

    async fn send_keys(&self, target: &str, command: &str) -> Result<()> {
        self.run(&["send-keys", "-t", target, "-l", "--", command])
            .await?;
        self.run(&["send-keys", "-t", target, "Enter"]).await?;
        debug!(target, command, "Sent keys");
        Ok(())
    }

    async fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        let out = self.run(&["list-panes", "-a", "-F", PaneInfo::FORMAT]).await?;
        Ok(out.lines().filter_map(PaneInfo::parse_line).collect())
    }

    async fn validate_pane(&self, target: &PaneTarget) -> Result<()> {
        let target = target.to_string();
        let pane_id = self
            .run(&["display-message", "-t", &target, "-p", "#{pane_id}"])
            .await
            .map_err(|e| match e {
                Error::Command { stderr, .. } => Error::PaneNotFound {
                    target: target.clone(),
                    detail: stderr,
                },
                other => other,
            })?;

        if !pane_id.starts_with('%') {
            return Err(Error::PaneNotFound {
                target,
                detail: format!("invalid pane id '{pane_id}'"),
            });
        }
        Ok(())
    }
}
