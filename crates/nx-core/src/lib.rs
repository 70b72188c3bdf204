//! nx Core - Runtime Primitives
//!
//! Building blocks shared by the nx protocol handlers:
//! - Socket: private runtime directory and single-peer Unix sockets
//! - Bridge: bidirectional byte copying between two streams, plus the
//!   stdio client that runs inside a terminal pane
//! - Supervisor: the cancellable accept loop every handler runs
//! - Shutdown: root cancellation and session draining
//! - Error: error taxonomy and the shutdown-signature predicate

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
pub mod error;
pub mod shutdown;
pub mod socket;
pub mod supervisor;

pub use bridge::{bridge, bridge_local, bridge_stdio, BridgeSession};
pub use error::{
    closed_listener_error, is_shutdown_error, BridgeError, Direction, Error, Result,
};
pub use shutdown::{wait_for_shutdown_signal, ShutdownController, ShutdownPhase, TaskGuard};
pub use socket::{LocalSocket, SocketManager};
pub use supervisor::{HandlerError, Listener, ACCEPT_BACKOFF};
