//! Command-line argument parsing for the reflow client

use clap::Parser;
use std::path::PathBuf;

/// reflow - keeps pane geometry and screen contents in sync with a reflow server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Custom socket path
    ///
    /// Override the default Unix socket path for connecting to the server.
    #[arg(long, short = 'S', env = "REFLOW_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Client config file (defaults to client.toml in the config dir)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Override the resize debounce window in milliseconds
    #[arg(long)]
    pub debounce_ms: Option<u64>,

    /// Domain id to attach to instead of the server's default domain
    #[arg(long, env = "REFLOW_DOMAIN")]
    pub domain: Option<String>,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["reflow"]).unwrap();
        assert!(args.config.is_none());
        assert!(args.debounce_ms.is_none());
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "reflow",
            "-S",
            "/tmp/r.sock",
            "--debounce-ms",
            "80",
            "--config",
            "/tmp/client.toml",
        ])
        .unwrap();
        assert_eq!(args.socket, Some(PathBuf::from("/tmp/r.sock")));
        assert_eq!(args.debounce_ms, Some(80));
        assert_eq!(args.config, Some(PathBuf::from("/tmp/client.toml")));
    }

    #[test]
    fn test_rejects_bad_debounce() {
        assert!(Args::try_parse_from(["reflow", "--debounce-ms", "soon"]).is_err());
    }
}
