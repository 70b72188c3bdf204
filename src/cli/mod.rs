//! CLI module for nx
//!
//! - `serve` (default): run the multiplexer
//! - `exec`: run plugins against an existing tmux pane
//! - `bridge`: stdio client used inside shell panes
//! - `plugins`: list or install plugins

use std::time::Duration;

use clap::{Parser, Subcommand};

pub mod bridge;
pub mod exec;
pub mod plugins;
pub mod serve;

/// Single-port multiplexer for reverse shells, SSH tunnels and file serving
#[derive(Parser, Debug)]
#[command(name = "nx")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub serve: serve::ServeArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the multiplexer (default)
    Serve(serve::ServeArgs),
    /// Execute plugins against a tmux pane
    Exec(exec::ExecArgs),
    /// Relay stdio to a shell socket (runs inside panes)
    Bridge(bridge::BridgeArgs),
    /// Manage plugins
    Plugins {
        #[command(subcommand)]
        action: plugins::PluginsAction,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve(args)) => serve::run(args, cli.verbose).await,
        Some(Commands::Exec(args)) => exec::run(args, cli.verbose).await,
        Some(Commands::Bridge(args)) => bridge::run(args, cli.verbose).await,
        Some(Commands::Plugins { action }) => plugins::run(action, cli.verbose).await,
        None => serve::run(cli.serve, cli.verbose).await,
    }
}

/// Parse `500ms`, `2s`, `1m`, `1h`; a bare number is seconds
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);

    let number: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration '{value}'"))?;
    let seconds = match unit.trim() {
        "ms" => number / 1000.0,
        "" | "s" => number,
        "m" => number * 60.0,
        "h" => number * 3600.0,
        other => return Err(format!("unknown duration unit '{other}' in '{value}'")),
    };
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("invalid duration '{value}'"));
    }
    Ok(Duration::from_secs_f64(seconds))
}
