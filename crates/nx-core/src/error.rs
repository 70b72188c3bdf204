//! Error types for nx-core
//!
//! Errors fall into three groups: start-up failures ([`Error::Configuration`],
//! [`Error::Io`]), per-session bridge failures ([`BridgeError`]) and the
//! shutdown signature ([`Error::Cancelled`], [`Error::ListenerClosed`]) which
//! callers treat as clean termination.

use std::fmt;
use std::io;

use thiserror::Error;

/// Which way a bridged copy was moving bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the remote TCP peer into the local socket
    Inbound,
    /// From the local socket back to the remote TCP peer
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "remote->local"),
            Self::Outbound => write!(f, "local->remote"),
        }
    }
}

/// Failure inside a bidirectional byte bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The local socket never produced a peer
    #[error("failed to accept unix connection: {0}")]
    Accept(#[source] io::Error),

    /// One copy direction failed mid-stream
    #[error("copy {direction} failed: {source}")]
    Copy {
        /// Direction that failed
        direction: Direction,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid settings or a missing collaborator
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Filesystem or socket failure
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted
        context: String,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// Bridge failure
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// The governing cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    /// The listener was closed underneath an accept loop
    #[error("use of closed listener")]
    ListenerClosed,
}

impl Error {
    /// Wrap an I/O error with a short description of the failed step
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether this error is the shutdown signature rather than a failure
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        match self {
            Self::Cancelled | Self::ListenerClosed => true,
            Self::Io { source, .. } => is_shutdown_error(source),
            Self::Bridge(BridgeError::Accept(source)) => is_shutdown_error(source),
            _ => false,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

const CLOSED_LISTENER: &str = "use of closed listener";

/// Build the I/O error an accept loop reports once its listener is gone
#[must_use]
pub fn closed_listener_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, CLOSED_LISTENER)
}

/// Recognise the error produced by [`closed_listener_error`]
#[must_use]
pub fn is_shutdown_error(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotConnected
        && err
            .get_ref()
            .is_some_and(|inner| inner.to_string() == CLOSED_LISTENER)
}
