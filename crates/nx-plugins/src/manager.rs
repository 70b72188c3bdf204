//! Plugin storage and execution

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use include_dir::{include_dir, Dir};
use nx_tmux::TerminalMultiplexer;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};

/// Scripts shipped inside the binary
static BUNDLED: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/plugins");

const EXTENSION: &str = "sh";

/// Default pause between two lines of a script
pub const DEFAULT_LINE_DELAY: Duration = Duration::from_millis(500);

/// Default upper bound for one script
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do when a script in a sequence fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    /// Log the failure and run the next script
    #[default]
    BestEffort,
    /// Stop at the first failure and return it
    FailFast,
}

/// Outcome of [`PluginManager::execute_all`] in best-effort mode
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ExecSummary {
    /// Scripts that ran to the end
    pub completed: Vec<String>,
    /// Scripts that failed, with the error text
    pub failed: Vec<(String, String)>,
}

/// Finds plugin scripts and types them into panes
#[derive(Clone)]
pub struct PluginManager {
    dir: PathBuf,
    line_delay: Duration,
    script_timeout: Duration,
    terminal: Arc<dyn TerminalMultiplexer>,
}

impl PluginManager {
    /// Manage plugins in [`default_dir`](Self::default_dir)
    pub fn new(terminal: Arc<dyn TerminalMultiplexer>) -> Self {
        Self {
            dir: Self::default_dir(),
            line_delay: DEFAULT_LINE_DELAY,
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
            terminal,
        }
    }

    /// `<config dir>/nx/plugins`
    #[must_use]
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nx")
            .join("plugins")
    }

    /// Use another plugin directory
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Pause between lines
    #[must_use]
    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }

    /// Upper bound for one script
    #[must_use]
    pub fn with_script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout = timeout;
        self
    }

    /// Directory scripts are read from
    #[must_use]
    pub fn plugin_dir(&self) -> &Path {
        &self.dir
    }

    /// Names of the scripts compiled into the binary
    #[must_use]
    pub fn bundled_names() -> Vec<String> {
        let mut names: Vec<String> = BUNDLED
            .files()
            .filter_map(|f| script_name(f.path()))
            .collect();
        names.sort();
        names
    }

    /// Copy bundled scripts into the plugin directory
    ///
    /// Existing files are left alone. Returns how many were written.
    pub fn install_bundled(&self) -> Result<usize> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            Error::io(format!("failed to create {}", self.dir.display()), e)
        })?;

        let mut installed = 0;
        for file in BUNDLED.files() {
            let Some(file_name) = file.path().file_name() else {
                continue;
            };
            let dest = self.dir.join(file_name);
            if dest.exists() {
                debug!(plugin = %dest.display(), "Plugin already exists, skipping");
                continue;
            }

            std::fs::write(&dest, file.contents())
                .map_err(|e| Error::io(format!("failed to write {}", dest.display()), e))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))
                    .map_err(|e| Error::io("failed to mark plugin executable", e))?;
            }
            info!(plugin = %dest.display(), "Installed plugin");
            installed += 1;
        }

        if installed == 0 {
            info!(dir = %self.dir.display(), "No new plugins to install");
        }
        Ok(installed)
    }

    /// Installed plugin names, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::io(
                    format!("failed to read plugin directory {}", self.dir.display()),
                    e,
                ))
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| script_name(&entry.path()))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Whether `<name>.sh` is installed
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.script_path(name)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    fn script_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(Error::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.{EXTENSION}")))
    }

    /// The commands a script would type: trimmed, without blanks or comments
    pub async fn lines(&self, name: &str) -> Result<Vec<String>> {
        let path = self.script_path(name)?;
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::NotFound {
                    name: name.to_string(),
                    dir: self.dir.clone(),
                }
            } else {
                Error::io(format!("failed to read {}", path.display()), e)
            }
        })?;

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    /// Fail with [`Error::NotFound`] for the first missing script
    pub fn validate(&self, names: &[String]) -> Result<()> {
        for name in names {
            if !self.exists(name) {
                self.script_path(name)?;
                return Err(Error::NotFound {
                    name: name.clone(),
                    dir: self.dir.clone(),
                });
            }
        }
        Ok(())
    }

    /// Lines of every script, for dry runs
    pub async fn preview(&self, names: &[String]) -> Result<Vec<(String, Vec<String>)>> {
        let mut scripts = Vec::with_capacity(names.len());
        for name in names {
            scripts.push((name.clone(), self.lines(name).await?));
        }
        Ok(scripts)
    }

    /// Type one script into `target`, line by line
    ///
    /// A line tmux refuses is logged and skipped. The whole script is bounded
    /// by the script timeout.
    #[instrument(skip(self), fields(timeout_secs = self.script_timeout.as_secs()))]
    pub async fn execute(&self, name: &str, target: &str) -> Result<()> {
        let lines = self.lines(name).await?;
        info!(lines = lines.len(), "Running plugin");

        tokio::time::timeout(self.script_timeout, self.type_lines(&lines, target))
            .await
            .map_err(|_| Error::Timeout {
                name: name.to_string(),
                secs: self.script_timeout.as_secs(),
            })?;

        info!("Plugin done");
        Ok(())
    }

    async fn type_lines(&self, lines: &[String], target: &str) {
        for line in lines {
            debug!(command = %line, "Plugin command");
            if let Err(e) = self.terminal.send_keys(target, line).await {
                warn!(error = %e, "Plugin command failed");
            }
            tokio::time::sleep(self.line_delay).await;
        }
    }

    /// Run several scripts in order against `target`
    ///
    /// Every script must exist before any of them runs.
    pub async fn execute_all(
        &self,
        names: &[String],
        target: &str,
        mode: ExecMode,
    ) -> Result<ExecSummary> {
        self.validate(names)?;

        let mut summary = ExecSummary::default();
        for name in names {
            match self.execute(name, target).await {
                Ok(()) => summary.completed.push(name.clone()),
                Err(e) if mode == ExecMode::FailFast => return Err(e),
                Err(e) => {
                    warn!(plugin = %name, error = %e, "Plugin failed, continuing");
                    summary.failed.push((name.clone(), e.to_string()));
                }
            }
        }
        Ok(summary)
    }
}

fn script_name(path: &Path) -> Option<String> {
    if path.extension()? != EXTENSION {
        return None;
    }
    Some(path.file_stem()?.to_str()?.to_string())
}
