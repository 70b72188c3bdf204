//! Error types for nx-plugins

use std::path::PathBuf;

use thiserror::Error;

/// Plugin error type
#[derive(Debug, Error)]
pub enum Error {
    /// No `<name>.sh` in the plugin directory
    #[error("plugin not found: {name} (looked in {dir})")]
    NotFound {
        /// Requested plugin
        name: String,
        /// Plugin directory
        dir: PathBuf,
    },

    /// Plugin names are plain file stems
    #[error("invalid plugin name '{0}'")]
    InvalidName(String),

    /// The script did not finish in time
    #[error("plugin {name} timed out after {secs}s")]
    Timeout {
        /// Plugin that timed out
        name: String,
        /// Configured limit
        secs: u64,
    },

    /// Filesystem failure
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted
        context: String,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Terminal multiplexer failure
    #[error("terminal error: {0}")]
    Terminal(#[from] nx_tmux::Error),
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
