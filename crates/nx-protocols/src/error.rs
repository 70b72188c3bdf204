//! Error types for nx-protocols

use thiserror::Error;

/// Protocol handler error type
#[derive(Debug, Error)]
pub enum Error {
    /// A handler was built without something it needs
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Socket, bridge or supervisor failure
    #[error(transparent)]
    Core(#[from] nx_core::Error),

    /// Terminal multiplexer failure
    #[error("terminal error: {0}")]
    Terminal(#[from] nx_tmux::Error),

    /// Plugin failure
    #[error("plugin error: {0}")]
    Plugin(#[from] nx_plugins::Error),

    /// HTTP connection failure
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    /// SSH protocol failure
    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this is the shutdown signature rather than a failure
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        match self {
            Self::Core(e) => e.is_shutdown(),
            Self::Io(e) => nx_core::is_shutdown_error(e),
            _ => false,
        }
    }
}

impl nx_core::HandlerError for Error {
    fn is_shutdown(&self) -> bool {
        Error::is_shutdown(self)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
