//! Pane addressing

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::Error;

static TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^:]+):(\d+)\.(\d+)$").expect("pane target pattern is a compile-time constant")
});

/// A pane addressed as `session:window.pane`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaneTarget {
    /// Session name
    pub session: String,
    /// Window index
    pub window: u32,
    /// Pane index within the window
    pub pane: u32,
}

impl PaneTarget {
    /// Parse `session:window.pane`
    pub fn parse(target: &str) -> Result<Self, Error> {
        target.parse()
    }
}

impl FromStr for PaneTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = TARGET_RE
            .captures(s.trim())
            .ok_or_else(|| Error::InvalidTarget(s.to_string()))?;
        let number = |i: usize| {
            caps[i]
                .parse::<u32>()
                .map_err(|_| Error::InvalidTarget(s.to_string()))
        };
        Ok(Self {
            session: caps[1].to_string(),
            window: number(2)?,
            pane: number(3)?,
        })
    }
}

impl fmt::Display for PaneTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.session, self.window, self.pane)
    }
}

/// One row of `tmux list-panes -a`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    /// Where the pane lives
    pub target: PaneTarget,
    /// Whether it is the active pane of its window
    pub active: bool,
    /// Name of the containing window
    pub window_name: String,
}

impl PaneInfo {
    /// Format string handed to `tmux list-panes -F`
    pub const FORMAT: &'static str =
        "#{session_name}:#{window_index}.#{pane_index}|#{pane_active}|#{window_name}";

    /// Parse one line produced with [`FORMAT`](Self::FORMAT)
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut parts = line.splitn(3, '|');
        let target = parts.next()?.parse().ok()?;
        let active = parts.next()? == "1";
        let window_name = parts.next()?.to_string();
        Some(Self {
            target,
            active,
            window_name,
        })
    }
}

impl fmt::Display for PaneInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.target, self.window_name)?;
        if self.active {
            write!(f, " [active]")?;
        }
        Ok(())
    }
}

/// A freshly created window and its first pane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneHandle {
    /// Owning session
    pub session: String,
    /// Window index
    pub window: u32,
    /// Window name
    pub name: String,
    /// tmux pane id such as `%12`
    pub pane_id: String,
}

impl PaneHandle {
    /// Target string for `send-keys`; the pane id stays valid if windows move
    #[must_use]
    pub fn target(&self) -> String {
        if self.pane_id.starts_with('%') {
            self.pane_id.clone()
        } else {
            format!("{}:{}.0", self.session, self.window)
        }
    }
}
