//! Error types for nx-tmux

use thiserror::Error;

/// Terminal multiplexer error type
#[derive(Debug, Error)]
pub enum Error {
    /// The tmux binary could not be started
    #[error("tmux is not available: {0}")]
    Unavailable(#[source] std::io::Error),

    /// tmux ran and reported failure
    #[error("tmux {command} failed: {stderr}")]
    Command {
        /// Subcommand that failed
        command: String,
        /// What tmux printed on stderr
        stderr: String,
    },

    /// A pane target string was not `session:window.pane`
    #[error("invalid pane target '{0}' (expected session:window.pane)")]
    InvalidTarget(String),

    /// The pane does not exist or cannot be reached
    #[error("pane {target} does not exist or is not accessible: {detail}")]
    PaneNotFound {
        /// Target that was checked
        target: String,
        /// tmux output
        detail: String,
    },

    /// tmux printed something we could not parse
    #[error("unexpected tmux output: {0}")]
    UnexpectedOutput(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
