//! reflow server
//!
//! Listens on a Unix socket, serves reflow clients and reloads its config
//! file while running.

use tracing::{debug, error, info, warn};

use reflow_server::config::config_handle;
use reflow_server::{AppConfig, ConfigLoader, ConfigWatcher, Server};
use reflow_utils::{init_logging_with_config, server_config_file, socket_path, LogConfig, Result};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    init_logging_with_config(LogConfig::server())?;
    info!("reflow server starting");
    debug!("CLI args: {:?}", args);

    if let Err(e) = run(args).await {
        error!("reflow server error: {}", e);
        eprintln!("Error: {}", e);
        return Err(e);
    }

    info!("reflow server stopped");
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config_path = args.config.clone().unwrap_or_else(server_config_file);
    let config = if config_path.exists() {
        ConfigLoader::load_and_validate_from(&config_path)?
    } else {
        debug!(path = %config_path.display(), "No server config, using defaults");
        AppConfig::default()
    };
    let socket = args
        .socket
        .clone()
        .or_else(|| config.server.socket.clone())
        .unwrap_or_else(socket_path);

    let handle = config_handle(config);

    if !args.no_watch {
        match ConfigWatcher::new(&config_path) {
            Ok(watcher) => {
                tokio::spawn(watcher.run(handle.clone()));
            }
            Err(e) => warn!("Config hot-reload disabled: {}", e),
        }
    }

    let running = Server::new(handle).start(&socket)?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to wait for ctrl-c: {}", e);
    }
    info!("Interrupted, shutting down");
    running.shutdown().await
}
