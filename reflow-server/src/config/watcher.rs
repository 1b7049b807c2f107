//! File watcher for configuration hot-reload

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, FileIdMap};
use tokio::sync::mpsc;

use reflow_utils::{ReflowError, Result};

use super::{ConfigHandle, ConfigLoader};

/// Debounce applied to editor save storms
const WATCH_DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches the server config file and swaps reloads into a [`ConfigHandle`]
pub struct ConfigWatcher {
    path: PathBuf,
    rx: mpsc::UnboundedReceiver<Result<Vec<Event>>>,
    /// Debouncer handle (kept alive)
    _debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
}

impl ConfigWatcher {
    /// Watch `path`; its directory is created when missing
    pub fn new(path: &Path) -> Result<Self> {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ReflowError::config(format!("{} has no parent", path.display())))?;

        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| ReflowError::FileWrite {
                path: dir.clone(),
                source: e,
            })?;
        }

        let (tx, rx) = mpsc::unbounded_channel();

        let mut debouncer = new_debouncer(
            WATCH_DEBOUNCE,
            None,
            move |result: DebounceEventResult| {
                let events = result
                    .map(|events| events.into_iter().map(|e| e.event).collect())
                    .map_err(|errs| ReflowError::config(format!("Watch error: {:?}", errs)));
                let _ = tx.send(events);
            },
        )
        .map_err(|e| ReflowError::config(format!("Failed to create watcher: {}", e)))?;

        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| ReflowError::config(format!("Failed to watch: {}", e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            rx,
            _debouncer: debouncer,
        })
    }

    /// Run the watcher loop, updating config on changes
    pub async fn run(mut self, config: ConfigHandle) {
        tracing::info!("Config watcher started for {:?}", self.path);

        while let Some(result) = self.rx.recv().await {
            match result {
                Ok(events) => {
                    if events.iter().any(|e| Self::is_config_change(e, &self.path)) {
                        self.handle_change(&config);
                    }
                }
                Err(e) => {
                    tracing::error!("Config watch error: {}", e);
                }
            }
        }
    }

    fn is_config_change(event: &Event, path: &Path) -> bool {
        let name = path.file_name();
        matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
            && event.paths.iter().any(|p| p.file_name() == name)
    }

    fn handle_change(&self, config: &ConfigHandle) {
        tracing::info!("Config file changed, reloading...");

        match ConfigLoader::load_and_validate_from(&self.path) {
            Ok(new_config) => {
                let old_config = config.load();

                if old_config.notify.coalesce_ms != new_config.notify.coalesce_ms {
                    tracing::info!(
                        old = old_config.notify.coalesce_ms,
                        new = new_config.notify.coalesce_ms,
                        "Resize coalescing window changed"
                    );
                }
                if old_config.terminal != new_config.terminal {
                    tracing::warn!("terminal settings changed - restart the server to apply");
                }

                config.store(Arc::new(new_config));
                tracing::info!("Configuration reloaded successfully");
            }
            Err(e) => {
                tracing::error!("Config reload failed (keeping previous): {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{new_config_handle, AppConfig};
    use tempfile::tempdir;

    fn modify(path: &str) -> Event {
        Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Data(
                notify::event::DataChange::Content,
            )),
            paths: vec![PathBuf::from(path)],
            attrs: Default::default(),
        }
    }

    #[test]
    fn test_is_config_change() {
        let watched = Path::new("/home/user/.config/reflow/server.toml");
        assert!(ConfigWatcher::is_config_change(
            &modify("/home/user/.config/reflow/server.toml"),
            watched
        ));
        assert!(!ConfigWatcher::is_config_change(
            &modify("/home/user/.config/reflow/client.toml"),
            watched
        ));
    }

    #[tokio::test]
    async fn test_reload_swaps_valid_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "[notify]\ncoalesce_ms = 25\n").unwrap();

        let watcher = ConfigWatcher::new(&path).unwrap();
        let handle = new_config_handle();
        watcher.handle_change(&handle);
        assert_eq!(handle.load().notify.coalesce_ms, 25);

        // Invalid reload keeps the previous value
        std::fs::write(&path, "[notify]\ncoalesce_ms = 0\n").unwrap();
        watcher.handle_change(&handle);
        assert_eq!(handle.load().notify.coalesce_ms, 25);
        assert_ne!(**handle.load(), AppConfig::default());
    }
}
