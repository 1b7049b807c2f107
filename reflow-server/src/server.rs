//! Socket server: accept loop and per-client framing

use std::path::Path;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use reflow_protocol::{ClientMessage, ServerCodec, ServerMessage};
use reflow_utils::{ensure_dir, ReflowError, Result};

use crate::config::{AppConfig, ConfigHandle};
use crate::domain::{DomainManager, SharedDomains};
use crate::handlers::{HandlerContext, HandlerResult};
use crate::notify::{
    resize_signal_channel, ResizeSignal, ResizeSignalSender, ServerNotificationCoalescer,
};
use crate::registry::{ClientId, ClientRegistry};
use crate::responder::RenderChangeResponder;

/// Outbound queue per client
const CLIENT_CHANNEL_CAPACITY: usize = 256;

/// State shared by every connection task
#[derive(Clone)]
pub struct SharedState {
    pub domains: SharedDomains,
    pub registry: Arc<ClientRegistry>,
    pub config: ConfigHandle,
    pub responder: Arc<RenderChangeResponder>,
    pub signals: ResizeSignalSender,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl SharedState {
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn context(&self, client_id: ClientId) -> HandlerContext {
        HandlerContext::new(
            Arc::clone(&self.domains),
            Arc::clone(&self.registry),
            Arc::clone(&self.responder),
            self.signals.clone(),
            client_id,
        )
    }
}

/// The reflow server before it starts listening
pub struct Server {
    state: SharedState,
    coalescer: ServerNotificationCoalescer,
    signal_rx: mpsc::UnboundedReceiver<ResizeSignal>,
}

impl Server {
    pub fn new(config: ConfigHandle) -> Self {
        let current: Arc<AppConfig> = config.load_full();
        let domains = DomainManager::shared(current.terminal.clone());
        let registry = Arc::new(ClientRegistry::new());
        let responder = Arc::new(RenderChangeResponder::new(Arc::clone(&domains)));
        let (signals, signal_rx) = resize_signal_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        let coalescer = ServerNotificationCoalescer::new(
            Arc::clone(&domains),
            Arc::clone(&registry),
            Arc::clone(&config),
        );

        Self {
            state: SharedState {
                domains,
                registry,
                config,
                responder,
                signals,
                shutdown_tx,
            },
            coalescer,
            signal_rx,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Bind `socket` and serve in a background task
    pub fn start(self, socket: &Path) -> Result<RunningServer> {
        let listener = bind_socket(socket)?;
        let state = self.state.clone();
        let path = socket.to_path_buf();
        let task = tokio::spawn(async move {
            self.serve(listener).await;
            remove_socket(&path);
            Ok(())
        });
        Ok(RunningServer { state, task })
    }

    /// Bind `socket` and serve until shutdown
    pub async fn run(self, socket: &Path) -> Result<()> {
        let listener = bind_socket(socket)?;
        self.serve(listener).await;
        remove_socket(socket);
        Ok(())
    }

    async fn serve(self, listener: UnixListener) {
        let Server {
            state,
            coalescer,
            signal_rx,
        } = self;

        let cancel = CancellationToken::new();
        let coalescer_task = tokio::spawn(coalescer.run(signal_rx, cancel.clone()));
        let mut shutdown_rx = state.subscribe_shutdown();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            debug!("New connection");
                            let state = state.clone();
                            tokio::spawn(async move {
                                let (reader, writer) = stream.into_split();
                                handle_client(reader, writer, state).await;
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }

        cancel.cancel();
        if let Ok(stats) = coalescer_task.await {
            debug!(?stats, "Coalescer finished");
        }
    }
}

/// A server serving in the background
pub struct RunningServer {
    state: SharedState,
    task: JoinHandle<Result<()>>,
}

impl RunningServer {
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Stop accepting, disconnect clients and wait for the accept loop
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.state.shutdown_tx.send(());
        self.task
            .await
            .map_err(|e| ReflowError::internal(format!("server task failed: {}", e)))?
    }
}

/// Bind the listening socket, replacing a stale one
fn bind_socket(path: &Path) -> Result<UnixListener> {
    if let Some(dir) = path.parent() {
        ensure_dir(dir).map_err(|e| ReflowError::FileWrite {
            path: dir.to_path_buf(),
            source: e,
        })?;
    }

    if path.exists() {
        if std::os::unix::net::UnixStream::connect(path).is_ok() {
            return Err(ReflowError::connection(format!(
                "a server is already listening on {}",
                path.display()
            )));
        }
        debug!(path = %path.display(), "Removing stale socket");
        std::fs::remove_file(path)?;
    }

    let listener = UnixListener::bind(path)?;
    info!(socket = %path.display(), "Listening");
    Ok(listener)
}

fn remove_socket(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        debug!(path = %path.display(), "Socket cleanup skipped: {}", e);
    }
}

/// Serve one client until it hangs up or the server shuts down
pub async fn handle_client<R, W>(reader: R, writer: W, state: SharedState)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(CLIENT_CHANNEL_CAPACITY);
    let client_id = state.registry.register_client(tx);
    let ctx = state.context(client_id);
    info!(client = %client_id, "Client accepted");

    let mut framed_write = FramedWrite::new(writer, ServerCodec::new());
    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let type_name = msg.type_name();
            if let Err(e) = framed_write.send(msg).await {
                warn!(client = %client_id, message_type = type_name, "Write failed: {}", e);
                break;
            }
        }
    });

    let mut framed_read = FramedRead::new(reader, ServerCodec::new());
    let mut shutdown_rx = state.subscribe_shutdown();

    loop {
        tokio::select! {
            frame = framed_read.next() => match frame {
                Some(Ok(msg)) => {
                    if !dispatch(&ctx, msg).await {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(client = %client_id, "Malformed frame: {}", e);
                    break;
                }
                None => break,
            },
            _ = shutdown_rx.recv() => break,
        }
    }

    // Dropping the registry entry drops the last sender and ends the writer
    state.registry.unregister_client(client_id);
    state.domains.write().forget_client(client_id);
    let _ = writer_task.await;
    info!(client = %client_id, "Client disconnected");
}

/// Route one message and deliver the result; false once the client is gone
async fn dispatch(ctx: &HandlerContext, msg: ClientMessage) -> bool {
    let registry = &ctx.registry;
    match ctx.route_message(msg).await {
        HandlerResult::Response(response) => registry.send_to_client(ctx.client_id, response).await,
        HandlerResult::ResponseWithBroadcast {
            response,
            domain_id,
            broadcast,
        } => {
            let delivered = registry.send_to_client(ctx.client_id, response).await;
            registry
                .broadcast_to_domain_except(domain_id, ctx.client_id, broadcast)
                .await;
            delivered
        }
        HandlerResult::NoResponse => true,
    }
}
