//! Server module for nx
//!
//! # Module Structure
//!
//! - `config`: Configuration structures
//! - `loader`: Configuration loading from files and environment
//! - `validation`: Startup validation and script-list normalisation
//! - `init`: Wiring and the main run loop

pub mod config;
mod init;
mod loader;
mod validation;

pub use init::{plugin_manager, run};
pub use loader::load_config;
pub use validation::requested_scripts;
