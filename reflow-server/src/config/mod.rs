//! Configuration management for the reflow server
//!
//! The active configuration lives behind an `ArcSwap` so the coalescer and
//! handlers read it without locking while the watcher swaps in reloads.

mod defaults;
mod loader;
mod schema;
mod watcher;

pub use defaults::DEFAULT_CONFIG_TOML;
pub use loader::ConfigLoader;
pub use schema::*;
pub use watcher::ConfigWatcher;

use arc_swap::ArcSwap;
use std::sync::Arc;

/// Shared configuration handle
pub type ConfigHandle = Arc<ArcSwap<AppConfig>>;

/// Create a new config handle with defaults
pub fn new_config_handle() -> ConfigHandle {
    config_handle(AppConfig::default())
}

/// Wrap an already loaded configuration
pub fn config_handle(config: AppConfig) -> ConfigHandle {
    Arc::new(ArcSwap::from_pointee(config))
}
