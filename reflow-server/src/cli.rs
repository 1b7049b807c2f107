//! Command-line argument parsing for the reflow server

use clap::Parser;
use std::path::PathBuf;

/// reflow-server - owns pane geometry and content for reflow clients
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Socket to listen on
    #[arg(long, short = 'S', env = "REFLOW_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Server config file (defaults to config.toml in the config dir)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Do not reload the config file when it changes
    #[arg(long)]
    pub no_watch: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
