//! nx Plugins - Post-Connect Scripts
//!
//! A plugin is a `<name>.sh` file whose non-comment lines are typed into a
//! shell pane one at a time, e.g. to upgrade a bare reverse shell to a PTY.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod manager;

pub use error::{Error, Result};
pub use manager::{
    ExecMode, ExecSummary, PluginManager, DEFAULT_LINE_DELAY, DEFAULT_SCRIPT_TIMEOUT,
};
