//! Error types for reflow
//!
//! Provides a unified error type used across all reflow crates. Per-pane
//! failures carry the pane they belong to so callers can keep them scoped.

use std::path::PathBuf;

/// Main error type for reflow operations
#[derive(Debug, thiserror::Error)]
pub enum ReflowError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Connection Errors ===

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Server not running at {path}")]
    ServerNotRunning { path: PathBuf },

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    // === Resize pipeline errors ===

    /// RPC timed out or the transport hiccuped; retried with current state
    #[error("Transient network error on pane {pane}: {reason}")]
    TransientNetwork { pane: String, reason: String },

    /// Server's pane list disagrees with the fingerprint assumed by a
    /// size-only update; healed by a full resync
    #[error("Topology mismatch in domain {domain}: expected {expected}, server has {actual}")]
    TopologyMismatch {
        domain: String,
        expected: String,
        actual: String,
    },

    /// Malformed response or unreconcilable generation; the connection is
    /// considered broken
    #[error("Fatal protocol error: {0}")]
    FatalProtocol(String),

    #[error("Protocol version mismatch: client={client}, server={server}")]
    ProtocolMismatch { client: u32, server: u32 },

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    // === Domain Errors ===

    #[error("Domain not found: {0}")]
    DomainNotFound(String),

    #[error("Pane not found: {0}")]
    PaneNotFound(String),

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReflowError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a transient network error scoped to a pane
    pub fn transient(pane: impl ToString, reason: impl Into<String>) -> Self {
        Self::TransientNetwork {
            pane: pane.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a fatal protocol error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::FatalProtocol(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork { .. } | Self::Connection(_) | Self::TopologyMismatch { .. }
        )
    }

    /// Errors that mean the connection can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FatalProtocol(_) | Self::ProtocolMismatch { .. } | Self::ConnectionClosed
        )
    }
}

/// Result type alias using ReflowError
pub type Result<T> = std::result::Result<T, ReflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_transient() {
        let err = ReflowError::transient("p1", "fetch timed out");
        assert_eq!(
            err.to_string(),
            "Transient network error on pane p1: fetch timed out"
        );
    }

    #[test]
    fn test_error_display_topology_mismatch() {
        let err = ReflowError::TopologyMismatch {
            domain: "d".into(),
            expected: "00aa".into(),
            actual: "00bb".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 00aa"));
        assert!(msg.contains("server has 00bb"));
    }

    #[test]
    fn test_error_display_file_read() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied");
        let err = ReflowError::FileRead {
            path: PathBuf::from("/etc/reflow.toml"),
            source: io_err,
        };
        let msg = err.to_string();
        assert!(msg.contains("Failed to read file"));
        assert!(msg.contains("/etc/reflow.toml"));
    }

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ReflowError = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ReflowError::transient("p", "timeout").is_retryable());
        assert!(ReflowError::connection("refused").is_retryable());
        assert!(ReflowError::TopologyMismatch {
            domain: "d".into(),
            expected: "a".into(),
            actual: "b".into(),
        }
        .is_retryable());

        assert!(!ReflowError::fatal("bad generation").is_retryable());
        assert!(!ReflowError::config("bad").is_retryable());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(ReflowError::fatal("malformed").is_fatal());
        assert!(ReflowError::ConnectionClosed.is_fatal());
        assert!(ReflowError::ProtocolMismatch { client: 1, server: 2 }.is_fatal());
        assert!(!ReflowError::transient("p", "timeout").is_fatal());
    }

    #[test]
    fn test_result_alias() {
        fn parse(ok: bool) -> Result<u8> {
            if ok {
                Ok(1)
            } else {
                Err(ReflowError::internal("nope"))
            }
        }
        assert_eq!(parse(true).unwrap(), 1);
        assert!(parse(false).is_err());
    }
}
