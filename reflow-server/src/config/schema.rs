//! Configuration schema structs

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub notify: NotifyConfig,
    pub terminal: TerminalConfig,
    pub server: ServerSection,
}

/// Resize notification coalescing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub coalesce_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { coalesce_ms: 16 }
    }
}

impl NotifyConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.coalesce_ms)
    }
}

/// Pane defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Lines of history kept per pane
    pub scrollback_lines: usize,
    pub default_rows: u16,
    pub default_cols: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            scrollback_lines: 100_000,
            default_rows: 24,
            default_cols: 80,
        }
    }
}

/// Listener settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Socket path (defaults to the runtime dir socket)
    pub socket: Option<PathBuf>,
}
