//! Error types for nx-mux

use thiserror::Error;

/// Dispatcher error type
#[derive(Debug, Error)]
pub enum Error {
    /// The shared listening socket could not be bound
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Invalid dispatcher settings
    #[error("invalid dispatcher configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl nx_core::HandlerError for Error {
    fn is_shutdown(&self) -> bool {
        matches!(self, Self::Io(e) if nx_core::is_shutdown_error(e))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
