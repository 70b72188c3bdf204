//! `nx plugins`: list or install plugin scripts

use std::sync::Arc;

use clap::Subcommand;
use nx_plugins::PluginManager;
use nx_tmux::TmuxClient;

#[derive(Subcommand, Debug)]
pub enum PluginsAction {
    /// Show installed and bundled plugins
    List,
    /// Copy bundled plugins into the plugin directory
    Install,
}

pub async fn run(action: PluginsAction, verbose: bool) -> anyhow::Result<()> {
    let mut config = crate::server::load_config()?;
    config.verbose |= verbose;
    crate::init_tracing(config.verbose);

    let manager = crate::server::plugin_manager(&config, Arc::new(TmuxClient::new()));
    match action {
        PluginsAction::List => list(&manager),
        PluginsAction::Install => install(&manager),
    }
}

fn list(manager: &PluginManager) -> anyhow::Result<()> {
    let installed = manager.list()?;
    println!("Plugin directory: {}", manager.plugin_dir().display());
    if installed.is_empty() {
        println!("  (none installed, run `nx plugins install`)");
    }
    for name in &installed {
        println!("  {name}");
    }

    let missing: Vec<String> = PluginManager::bundled_names()
        .into_iter()
        .filter(|name| !installed.contains(name))
        .collect();
    if !missing.is_empty() {
        println!();
        println!("Bundled but not installed:");
        for name in missing {
            println!("  {name}");
        }
    }
    Ok(())
}

fn install(manager: &PluginManager) -> anyhow::Result<()> {
    let installed = manager.install_bundled()?;
    println!(
        "Installed {installed} plugin(s) into {}",
        manager.plugin_dir().display()
    );
    Ok(())
}
