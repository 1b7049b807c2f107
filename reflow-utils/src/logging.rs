//! Logging infrastructure for reflow
//!
//! Provides unified logging setup using the tracing ecosystem.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::{paths, ReflowError, Result};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "REFLOW_LOG";

/// Log output destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// Log to stderr
    Stderr,
    /// Log to file (client and server daemon)
    File,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output destination
    pub output: LogOutput,
    /// Log level filter (e.g., "info", "reflow_client=debug,tokio=warn")
    pub filter: String,
    /// Include span events (enter/exit)
    pub span_events: bool,
    /// Include file/line in logs
    pub file_line: bool,
    /// Log file name inside the log dir
    pub file_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: "info".into(),
            span_events: false,
            file_line: false,
            file_name: "reflow.log".into(),
        }
    }
}

impl LogConfig {
    /// Create config for client (file logging, the terminal belongs to the UI)
    pub fn client() -> Self {
        Self {
            output: LogOutput::File,
            filter: std::env::var(LOG_ENV).unwrap_or_else(|_| "warn".into()),
            span_events: false,
            file_line: false,
            file_name: "client.log".into(),
        }
    }

    /// Create config for server daemon (file logging)
    pub fn server() -> Self {
        Self {
            output: LogOutput::File,
            filter: std::env::var(LOG_ENV).unwrap_or_else(|_| "info".into()),
            span_events: true,
            file_line: true,
            file_name: "server.log".into(),
        }
    }

    /// Create config for development (verbose stderr)
    pub fn development() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: "debug".into(),
            span_events: true,
            file_line: true,
            ..Self::default()
        }
    }
}

/// Initialize logging with custom configuration
pub fn init_logging_with_config(config: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| ReflowError::config(format!("Invalid log filter: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let fmt_layer = if config.span_events {
        fmt_layer.with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
    } else {
        fmt_layer
    };

    let fmt_layer = if config.file_line {
        fmt_layer.with_file(true).with_line_number(true)
    } else {
        fmt_layer.with_file(false).with_line_number(false)
    };

    match config.output {
        LogOutput::Stderr => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| ReflowError::internal(format!("Failed to init logging: {}", e)))?;
        }
        LogOutput::File => {
            let log_dir = paths::log_dir();
            paths::ensure_dir(&log_dir).map_err(|e| ReflowError::FileWrite {
                path: log_dir.clone(),
                source: e,
            })?;

            let log_path = log_dir.join(&config.file_name);
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .map_err(|e| ReflowError::FileWrite {
                    path: log_path,
                    source: e,
                })?;

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.with_writer(file).with_ansi(false))
                .try_init()
                .map_err(|e| ReflowError::internal(format!("Failed to init logging: {}", e)))?;
        }
    }

    Ok(())
}
