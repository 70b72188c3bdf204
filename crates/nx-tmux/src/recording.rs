//! Recording terminal multiplexer for tests
//!
//! Keeps sessions, windows and sent keystrokes in memory so callers can
//! assert on what would have been typed into tmux.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::target::{PaneHandle, PaneInfo, PaneTarget};
use crate::TerminalMultiplexer;

/// One `send_keys` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentKeys {
    /// Target passed to `send_keys`
    pub target: String,
    /// Command text
    pub command: String,
}

#[derive(Default)]
struct State {
    sessions: Vec<String>,
    windows: Vec<PaneHandle>,
    panes: Vec<PaneInfo>,
    sent: Vec<SentKeys>,
    fail_new_window: bool,
    fail_keys_containing: Option<String>,
}

/// In-memory [`TerminalMultiplexer`]
#[derive(Clone, Default)]
pub struct RecordingMultiplexer {
    state: Arc<Mutex<State>>,
    sent_signal: Arc<Notify>,
}

impl RecordingMultiplexer {
    /// Create an empty multiplexer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pretend `session` already exists
    #[must_use]
    pub fn with_session(self, session: &str) -> Self {
        self.state().sessions.push(session.to_string());
        self
    }

    /// Pretend a pane already exists
    #[must_use]
    pub fn with_pane(self, pane: PaneInfo) -> Self {
        self.state().panes.push(pane);
        self
    }

    /// Make every `new_window` call fail
    pub fn fail_new_window(&self) {
        self.state().fail_new_window = true;
    }

    /// Make `send_keys` fail for commands containing `pattern`
    pub fn fail_keys_containing(&self, pattern: &str) {
        self.state().fail_keys_containing = Some(pattern.to_string());
    }

    /// Sessions known so far
    #[must_use]
    pub fn sessions(&self) -> Vec<String> {
        self.state().sessions.clone()
    }

    /// Windows created so far
    #[must_use]
    pub fn windows(&self) -> Vec<PaneHandle> {
        self.state().windows.clone()
    }

    /// Every successful `send_keys` call, in order
    #[must_use]
    pub fn sent(&self) -> Vec<SentKeys> {
        self.state().sent.clone()
    }

    /// Commands sent to one target, in order
    #[must_use]
    pub fn commands_for(&self, target: &str) -> Vec<String> {
        self.state()
            .sent
            .iter()
            .filter(|k| k.target == target)
            .map(|k| k.command.clone())
            .collect()
    }

    /// Wait until at least `count` commands have been recorded
    pub async fn wait_for_sent(&self, count: usize) -> Vec<SentKeys> {
        loop {
            let notified = self.sent_signal.notified();
            {
                let state = self.state();
                if state.sent.len() >= count {
                    return state.sent.clone();
                }
            }
            notified.await;
        }
    }
}

#[async_trait]
impl TerminalMultiplexer for RecordingMultiplexer {
    async fn session_exists(&self, session: &str) -> Result<bool> {
        Ok(self.state().sessions.iter().any(|s| s == session))
    }

    async fn create_session(&self, session: &str) -> Result<()> {
        self.state().sessions.push(session.to_string());
        Ok(())
    }

    async fn new_window(&self, session: &str, name: &str) -> Result<PaneHandle> {
        let mut state = self.state();
        if state.fail_new_window {
            return Err(Error::Command {
                command: "new-window".to_string(),
                stderr: "can't find session".to_string(),
            });
        }

        let window = state.windows.len() as u32 + 1;
        let handle = PaneHandle {
            session: session.to_string(),
            window,
            name: name.to_string(),
            pane_id: format!("%{}", 100 + window),
        };
        state.panes.push(PaneInfo {
            target: PaneTarget {
                session: session.to_string(),
                window,
                pane: 0,
            },
            active: true,
            window_name: name.to_string(),
        });
        state.windows.push(handle.clone());
        Ok(handle)
    }

    async fn send_keys(&self, target: &str, command: &str) -> Result<()> {
        {
            let mut state = self.state();
            if let Some(pattern) = &state.fail_keys_containing {
                if command.contains(pattern.as_str()) {
                    return Err(Error::Command {
                        command: "send-keys".to_string(),
                        stderr: format!("refused '{command}'"),
                    });
                }
            }
            state.sent.push(SentKeys {
                target: target.to_string(),
                command: command.to_string(),
            });
        }
        self.sent_signal.notify_waiters();
        Ok(())
    }

    async fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        Ok(self.state().panes.clone())
    }

    async fn validate_pane(&self, target: &PaneTarget) -> Result<()> {
        if self.state().panes.iter().any(|p| &p.target == target) {
            Ok(())
        } else {
            Err(Error::PaneNotFound {
                target: target.to_string(),
                detail: "can't find pane".to_string(),
            })
        }
    }
}
