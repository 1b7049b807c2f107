//! Path utilities for reflow
//!
//! Handles XDG Base Directory specification compliance for config,
//! state and runtime directories.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Application identifier for XDG directories
const APP_NAME: &str = "reflow";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Get the Unix socket path for client-server communication
///
/// Location: `$XDG_RUNTIME_DIR/reflow/reflow.sock` or `/tmp/reflow-$UID/reflow.sock`
pub fn socket_path() -> PathBuf {
    runtime_dir().join("reflow.sock")
}

/// Get the runtime directory
///
/// Location: `$XDG_RUNTIME_DIR/reflow` or `/tmp/reflow-$UID`
pub fn runtime_dir() -> PathBuf {
    if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(xdg_runtime).join(APP_NAME)
    } else {
        // SAFETY: getuid() is always safe to call
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid))
    }
}

/// Get the configuration directory
///
/// Location: `$XDG_CONFIG_HOME/reflow` or `~/.config/reflow`
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| home_dir().join(".config").join(APP_NAME))
}

/// Client configuration file (`client.toml` in the config dir)
pub fn client_config_file() -> PathBuf {
    config_dir().join("client.toml")
}

/// Server configuration file (`server.toml` in the config dir)
pub fn server_config_file() -> PathBuf {
    config_dir().join("server.toml")
}

/// Get the state directory
///
/// Location: `$XDG_STATE_HOME/reflow` or `~/.local/state/reflow`
fn state_dir() -> PathBuf {
    project_dirs()
        .and_then(|p| p.state_dir().map(|d| d.to_path_buf()))
        .unwrap_or_else(|| home_dir().join(".local").join("state").join(APP_NAME))
}

/// Get the log directory
///
/// Location: `$XDG_STATE_HOME/reflow/log`
pub fn log_dir() -> PathBuf {
    state_dir().join("log")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
