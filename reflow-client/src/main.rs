//! reflow client
//!
//! Attaches to a reflow server, feeds the terminal's resize events into the
//! resize pipeline for the domain's root pane, and logs what comes back.

use std::path::Path;
use std::time::Duration;

use crossterm::event::{Event, EventStream};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use reflow_client::{
    ClientConfig, Connection, NoReflow, PipelineEvent, PipelineStats, RenderSink, ResizePipeline,
};
use reflow_protocol::{Dimensions, DomainId, Generation, PaneId, RangeContent};
use reflow_utils::{init_logging_with_config, socket_path, LogConfig, ReflowError, Result};

mod cli;

use cli::Args;

/// Delay before reattaching after a recoverable failure
const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    // Log to file, the terminal belongs to the user
    init_logging_with_config(LogConfig::client())?;
    info!("reflow client starting");
    debug!("CLI args: {:?}", args);

    match run(args).await {
        Ok(()) => {
            info!("reflow client exiting normally");
            Ok(())
        }
        Err(e) => {
            error!("reflow client error: {}", e);
            if e.is_fatal() {
                eprintln!("Connection broken: {}. Run reflow again to reconnect.", e);
            } else {
                eprintln!("Error: {}", e);
            }
            Err(e)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load_from_path(path)?,
        None => ClientConfig::load()?,
    };
    if let Some(ms) = args.debounce_ms {
        config.resize.debounce_ms = ms;
    }
    if args.domain.is_some() {
        config.connection.domain = args.domain.clone();
    }
    config.validate()?;

    let socket = args
        .socket
        .clone()
        .or_else(|| config.connection.socket.clone())
        .unwrap_or_else(socket_path);
    let domain = config.connection.domain_id()?;

    let mut failures = 0;
    loop {
        match attach(&socket, &config, domain).await {
            Ok(stats) => {
                info!(?stats, "Detached");
                return Ok(());
            }
            Err(e) if e.is_retryable() && failures < config.resize.max_retries => {
                failures += 1;
                warn!(attempt = failures, "Reattaching after error: {}", e);
                tokio::time::sleep(RECONNECT_BACKOFF * failures).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run one pipeline over one connection until it stops
async fn attach(
    socket: &Path,
    config: &ClientConfig,
    domain: Option<DomainId>,
) -> Result<PipelineStats> {
    let mut connection = Connection::with_socket_path(socket.to_path_buf());
    connection.connect().await?;

    let handle = ResizePipeline::spawn(
        config.resize.pipeline(),
        connection.sender(),
        LogSink,
        Box::new(NoReflow),
        domain,
    );

    let events = handle.events();
    let forward = tokio::spawn(async move {
        while let Some(msg) = connection.recv().await {
            if events.send(PipelineEvent::Server(msg)).await.is_err() {
                return;
            }
        }
        let _ = events.send(PipelineEvent::Disconnected).await;
    });

    let window = tokio::spawn(watch_window(handle.events()));

    let events = handle.events();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            let _ = events.send(PipelineEvent::Shutdown).await;
        }
    });

    let result = handle.join().await;
    forward.abort();
    window.abort();
    interrupt.abort();
    result
}

/// Forward terminal size changes to the pipeline
async fn watch_window(events: mpsc::Sender<PipelineEvent>) {
    if let Ok((cols, rows)) = crossterm::terminal::size() {
        let _ = events
            .send(PipelineEvent::WindowResize {
                cols,
                rows,
                timestamp: Instant::now(),
            })
            .await;
    }

    let mut stream = EventStream::new();
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Resize(cols, rows)) => {
                let event = PipelineEvent::WindowResize {
                    cols,
                    rows,
                    timestamp: Instant::now(),
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Terminal event stream failed: {}", e);
                break;
            }
        }
    }
}

/// Sink that records pipeline output in the log
struct LogSink;

impl RenderSink for LogSink {
    fn apply_lines(&mut self, pane_id: PaneId, generation: Generation, ranges: &[RangeContent]) {
        let rows: usize = ranges.iter().map(|r| r.lines.len()).sum();
        debug!(pane_id = %pane_id, %generation, rows, "Lines updated");
    }

    fn pane_resized(&mut self, pane_id: PaneId, dimensions: Dimensions) {
        info!(pane_id = %pane_id, size = %dimensions, "Pane resized");
    }

    fn topology_changed(&mut self, panes: &[PaneId]) {
        info!(panes = panes.len(), "Pane list refreshed");
    }

    fn on_pane_error(&mut self, pane_id: PaneId, error: &ReflowError) {
        warn!(pane_id = %pane_id, "{}", error);
    }

    fn on_connection_broken(&mut self, error: &ReflowError) {
        error!("Connection broken: {}", error);
    }
}
