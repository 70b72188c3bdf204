//! nx Mux - Protocol Detection and Dispatch
//!
//! One TCP port serves SSH, HTTP/WebDAV and raw shells. The dispatcher
//! peeks at each connection's first bytes, classifies it and routes it to
//! the handler registered for that class, replaying the peeked bytes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod classify;
pub mod dispatcher;
pub mod error;
pub mod oneshot;
pub mod peek;

pub use classify::{classify, inspect, ProtocolClass, Verdict, HTTP_METHODS, SSH_PREFIX};
pub use dispatcher::{detect, ClassListener, Dispatcher, DispatcherConfig, MuxConn};
pub use error::{Error, Result};
pub use oneshot::{OneShotConn, OneShotListener};
pub use peek::PeekableConn;
