//! nx - single-port multiplexer for reverse shells, SSH tunnels and file serving
//!
//! CLI entry point.

#![forbid(unsafe_code)]

use std::sync::Once;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod server;

const DEFAULT_FILTER: &str =
    "nx=info,nx_core=info,nx_mux=info,nx_tmux=info,nx_plugins=info,nx_protocols=info,tower_http=warn";
const VERBOSE_FILTER: &str =
    "nx=debug,nx_core=debug,nx_mux=debug,nx_tmux=debug,nx_plugins=debug,nx_protocols=debug,tower_http=debug";

static TRACING: Once = Once::new();

/// Install the global subscriber; `RUST_LOG` wins over `verbose`
pub(crate) fn init_tracing(verbose: bool) {
    TRACING.call_once(|| {
        let fallback = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| fallback.into()),
            )
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = cli::Cli::parse();
    cli::run(cli).await
}
