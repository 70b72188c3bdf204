//! `nx exec`: run plugins against an existing pane

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Args;
use nx_plugins::{ExecMode, PluginManager};
use nx_tmux::{PaneTarget, TerminalMultiplexer, TmuxClient};

use crate::server::requested_scripts;

/// Flags for `nx exec`
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Plugins to run (comma-separated or repeated)
    #[arg(required = true)]
    pub scripts: Vec<String>,

    /// Pane to type into, as session:window.pane
    #[arg(long, required = true)]
    pub on: String,

    /// Print the commands without sending them
    #[arg(long)]
    pub dry_run: bool,

    /// Keep going after a plugin fails
    #[arg(long)]
    pub continue_on_error: bool,

    /// Per-plugin time limit
    #[arg(long, default_value = "30s", value_parser = super::parse_duration)]
    pub script_timeout: Duration,
}

impl ExecArgs {
    fn script_names(&self) -> Vec<String> {
        requested_scripts(&self.scripts.join(","), false)
    }

    fn mode(&self) -> ExecMode {
        if self.continue_on_error {
            ExecMode::BestEffort
        } else {
            ExecMode::FailFast
        }
    }
}

pub async fn run(args: ExecArgs, verbose: bool) -> anyhow::Result<()> {
    let mut config = crate::server::load_config()?;
    config.verbose |= verbose;
    config.shell.script_timeout_secs = args.script_timeout.as_secs().max(1);
    crate::init_tracing(config.verbose);

    let tmux = TmuxClient::new();
    if !tmux.is_available().await {
        bail!("tmux is not installed or not in PATH");
    }
    let terminal: Arc<dyn TerminalMultiplexer> = Arc::new(tmux);
    let plugins = crate::server::plugin_manager(&config, Arc::clone(&terminal));

    execute(&args, terminal.as_ref(), &plugins).await
}

/// Validate the pane and scripts, then type or preview them
async fn execute(
    args: &ExecArgs,
    terminal: &dyn TerminalMultiplexer,
    plugins: &PluginManager,
) -> anyhow::Result<()> {
    let target = PaneTarget::parse(&args.on)?;

    if let Err(e) = terminal.validate_pane(&target).await {
        println!("Available panes:");
        for pane in terminal.list_panes().await.unwrap_or_default() {
            println!("  {pane}");
        }
        return Err(e).context(format!("pane {target} is not usable"));
    }

    let names = args.script_names();
    if let Err(e) = plugins.validate(&names) {
        println!("Available plugins:");
        for name in plugins.list().unwrap_or_default() {
            println!("  {name}");
        }
        return Err(e.into());
    }

    if args.dry_run {
        for (name, lines) in plugins.preview(&names).await? {
            println!("# {name} -> {target}");
            for line in lines {
                println!("{line}");
            }
        }
        return Ok(());
    }

    let summary = plugins
        .execute_all(&names, &target.to_string(), args.mode())
        .await?;
    for name in &summary.completed {
        println!("✓ {name}");
    }
    for (name, error) in &summary.failed {
        println!("✗ {name}: {error}");
    }
    if !summary.failed.is_empty() {
        bail!("{} of {} plugins failed", summary.failed.len(), names.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nx_tmux::{PaneInfo, RecordingMultiplexer};
    use tempfile::TempDir;

    fn args(scripts: &[&str], on: &str) -> ExecArgs {
        ExecArgs {
            scripts: scripts.iter().map(|s| s.to_string()).collect(),
            on: on.to_string(),
            dry_run: false,
            continue_on_error: false,
            script_timeout: Duration::from_secs(5),
        }
    }

    fn setup() -> (TempDir, Arc<RecordingMultiplexer>, PluginManager) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("recon.sh"), "# recon\nid\n\nuname -a\n").unwrap();
        let mux = Arc::new(RecordingMultiplexer::new().with_pane(PaneInfo {
            target: PaneTarget::parse("ops:1.0").unwrap(),
            active: true,
            window_name: "shell".into(),
        }));
        let plugins = PluginManager::new(mux.clone())
            .with_dir(dir.path())
            .with_line_delay(Duration::ZERO);
        (dir, mux, plugins)
    }

    #[test]
    fn test_script_names_split_commas() {
        let a = args(&["auto,sysinfo", "enum"], "ops:1.0");
        assert_eq!(a.script_names(), vec!["auto", "sysinfo", "enum"]);
        assert_eq!(a.mode(), ExecMode::FailFast);
    }

    #[tokio::test]
    async fn test_execute_types_into_pane() {
        let (_dir, mux, plugins) = setup();
        execute(&args(&["recon"], "ops:1.0"), mux.as_ref(), &plugins)
            .await
            .unwrap();
        assert_eq!(mux.commands_for("ops:1.0"), vec!["id", "uname -a"]);
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing() {
        let (_dir, mux, plugins) = setup();
        let mut a = args(&["recon"], "ops:1.0");
        a.dry_run = true;
        execute(&a, mux.as_ref(), &plugins).await.unwrap();
        assert!(mux.sent().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_unknown_pane_and_plugin() {
        let (_dir, mux, plugins) = setup();
        assert!(execute(&args(&["recon"], "ops:9.0"), mux.as_ref(), &plugins)
            .await
            .is_err());
        assert!(execute(&args(&["recon"], "not a pane"), mux.as_ref(), &plugins)
            .await
            .is_err());
        assert!(execute(&args(&["missing"], "ops:1.0"), mux.as_ref(), &plugins)
            .await
            .is_err());
        assert!(mux.sent().is_empty());
    }
}
