//! Configuration loader

use std::path::Path;

use reflow_utils::{server_config_file, ReflowError, Result};

use super::AppConfig;

/// Longest accepted coalescing window
const MAX_COALESCE_MS: u64 = 1_000;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<AppConfig> {
        let path = server_config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(AppConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| ReflowError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| ReflowError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        if config.notify.coalesce_ms == 0 || config.notify.coalesce_ms > MAX_COALESCE_MS {
            return Err(ReflowError::config(format!(
                "notify.coalesce_ms must be between 1 and {}",
                MAX_COALESCE_MS
            )));
        }

        if config.terminal.scrollback_lines == 0 {
            return Err(ReflowError::config(
                "terminal.scrollback_lines must be positive",
            ));
        }

        if config.terminal.default_rows == 0 || config.terminal.default_cols == 0 {
            return Err(ReflowError::config(
                "terminal.default_rows and default_cols must be positive",
            ));
        }

        Ok(())
    }

    /// Load and validate
    pub fn load_and_validate() -> Result<AppConfig> {
        let config = Self::load()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load a specific file and validate
    pub fn load_and_validate_from(path: &Path) -> Result<AppConfig> {
        let config = Self::load_from_path(path)?;
        Self::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CONFIG_TOML;
    use tempfile::tempdir;

    #[test]
    fn test_default_toml_matches_defaults() {
        let config = ConfigLoader::parse(DEFAULT_CONFIG_TOML, Path::new("default.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.toml");

        std::fs::write(
            &path,
            r#"
            [notify]
            coalesce_ms = 40
            "#,
        )
        .unwrap();

        let config = ConfigLoader::load_and_validate_from(&path).unwrap();
        assert_eq!(config.notify.coalesce_ms, 40);
        assert_eq!(config.terminal.scrollback_lines, 100_000);
    }

    #[test]
    fn test_load_missing_path_is_error() {
        let result = ConfigLoader::load_from_path(Path::new("/nonexistent/server.toml"));
        assert!(matches!(result, Err(ReflowError::FileRead { .. })));
    }

    #[test]
    fn test_validate_zero_window() {
        let mut config = AppConfig::default();
        config.notify.coalesce_ms = 0;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_zero_scrollback() {
        let mut config = AppConfig::default();
        config.terminal.scrollback_lines = 0;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = ConfigLoader::parse("invalid { toml", Path::new("test.toml"));
        assert!(matches!(result, Err(ReflowError::ConfigInvalid { .. })));
    }
}
