//! nx Protocols - Connection Handlers
//!
//! One handler per protocol class the dispatcher recognises:
//! - Shell: bridges raw reverse shells into tmux panes
//! - HTTP: file serving, uploads, WebDAV and a forward proxy
//! - SSH: password-checked tunnelling with local and remote forwards
//!
//! Each handler serves from any [`nx_core::Listener`], normally a
//! [`nx_mux::ClassListener`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod http;
pub mod shell;
pub mod ssh;

pub use error::{Error, Result};
pub use http::{HttpConfig, HttpService};
pub use shell::{ShellConfig, ShellOrchestrator, ShellSession};
pub use ssh::SshService;
