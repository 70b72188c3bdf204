//! `nx bridge`: the pane end of a shell session
//!
//! Typed into each new tmux window. Relays the pane's stdio to the Unix
//! socket the server is listening on until either side closes.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::Args;
use nx_core::{bridge_stdio, wait_for_shutdown_signal};
use tokio_util::sync::CancellationToken;

/// Flags for `nx bridge`
#[derive(Args, Debug)]
pub struct BridgeArgs {
    /// Session socket to connect to
    pub socket: PathBuf,
}

pub async fn run(args: BridgeArgs, verbose: bool) -> anyhow::Result<()> {
    crate::init_tracing(verbose);

    let token = CancellationToken::new();
    let relay = bridge_stdio(&token, &args.socket, tokio::io::stdin(), tokio::io::stdout());

    let result: anyhow::Result<()> = tokio::select! {
        result = relay => result.context("bridge failed"),
        _ = wait_for_shutdown_signal() => {
            token.cancel();
            Err(anyhow!("interrupted by signal"))
        }
    };

    // The stdin reader thread would hold runtime shutdown until the next line
    if let Err(e) = &result {
        eprintln!("nx bridge: {e:#}");
        std::process::exit(1);
    }
    std::process::exit(0);
}
