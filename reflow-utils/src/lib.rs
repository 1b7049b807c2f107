//! reflow-utils: Common utilities shared across reflow crates
//!
//! This crate provides:
//! - Unified error types ([`ReflowError`], [`Result`])
//! - Logging infrastructure ([`init_logging_with_config`], [`LogConfig`])
//! - XDG-compliant path utilities ([`paths`] module)

pub mod error;
pub mod logging;
pub mod paths;

pub use error::{ReflowError, Result};
pub use logging::{init_logging_with_config, LogConfig, LogOutput, LOG_ENV};
pub use paths::{
    client_config_file, config_dir, ensure_dir, log_dir, runtime_dir, server_config_file,
    socket_path,
};
