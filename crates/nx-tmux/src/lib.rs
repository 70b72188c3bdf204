//! nx Tmux - Terminal Multiplexer Control
//!
//! Shell sessions are presented to the operator as tmux windows. This crate
//! defines the narrow control surface nx needs ([`TerminalMultiplexer`]),
//! implements it over the `tmux` CLI ([`TmuxClient`]) and provides an
//! in-memory [`RecordingMultiplexer`] for tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod recording;
pub mod target;

use async_trait::async_trait;

pub use client::TmuxClient;
pub use error::{Error, Result};
pub use recording::{RecordingMultiplexer, SentKeys};
pub use target::{PaneHandle, PaneInfo, PaneTarget};

/// Operations nx performs against the terminal multiplexer
#[async_trait]
pub trait TerminalMultiplexer: Send + Sync {
    /// Whether a session with exactly this name exists
    async fn session_exists(&self, session: &str) -> Result<bool>;

    /// Create a detached session
    async fn create_session(&self, session: &str) -> Result<()>;

    /// Create `session` unless it already exists; returns whether it was created
    async fn ensure_session(&self, session: &str) -> Result<bool> {
        if self.session_exists(session).await? {
            return Ok(false);
        }
        self.create_session(session).await?;
        Ok(true)
    }

    /// Add a background window to `session`
    async fn new_window(&self, session: &str, name: &str) -> Result<PaneHandle>;

    /// Type `command` into `target` and press Enter
    async fn send_keys(&self, target: &str, command: &str) -> Result<()>;

    /// Every pane on the server
    async fn list_panes(&self) -> Result<Vec<PaneInfo>>;

    /// Fail with [`Error::PaneNotFound`] unless `target` exists
    async fn validate_pane(&self, target: &PaneTarget) -> Result<()>;
}
