//! Connection to the reflow server

use std::path::{Path, PathBuf};

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, error, info};

use reflow_protocol::{ClientCodec, ClientMessage, ServerMessage};
use reflow_utils::{socket_path, ReflowError, Result};

use super::handler::MessageSender;

/// Capacity of the in-process queues on either side of the socket
const CHANNEL_CAPACITY: usize = 256;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Client connection to the reflow server
pub struct Connection {
    socket_path: PathBuf,
    state: ConnectionState,
    /// Channel for outgoing messages
    tx: mpsc::Sender<ClientMessage>,
    /// Channel for receiving messages
    rx: mpsc::Receiver<ServerMessage>,
    task_handle: Option<JoinHandle<()>>,
}

impl Connection {
    /// Create a new connection to the default socket (not yet connected)
    pub fn new() -> Self {
        Self::with_socket_path(socket_path())
    }

    pub fn with_socket_path(path: PathBuf) -> Self {
        let (tx, _) = mpsc::channel(1);
        let (_, rx) = mpsc::channel(1);
        Self {
            socket_path: path,
            state: ConnectionState::Disconnected,
            tx,
            rx,
            task_handle: None,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connect to the server and start the I/O task
    pub async fn connect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;

        if !self.socket_path.exists() {
            self.state = ConnectionState::Disconnected;
            return Err(ReflowError::ServerNotRunning {
                path: self.socket_path.clone(),
            });
        }

        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            self.state = ConnectionState::Disconnected;
            ReflowError::connection(format!(
                "Failed to connect to {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;

        let framed = Framed::new(stream, ClientCodec::new());
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<ClientMessage>(CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel::<ServerMessage>(CHANNEL_CAPACITY);
        self.tx = outgoing_tx;
        self.rx = incoming_rx;

        self.task_handle = Some(tokio::spawn(Self::connection_task(
            framed,
            outgoing_rx,
            incoming_tx,
        )));
        self.state = ConnectionState::Connected;
        info!(socket = %self.socket_path.display(), "Connected to server");
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
        self.state = ConnectionState::Disconnected;
    }

    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(ReflowError::connection("Not connected"));
        }
        self.sender().send(msg).await
    }

    /// Receive the next message; None once the server hung up
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    pub fn sender(&self) -> MessageSender {
        MessageSender::new(self.tx.clone())
    }

    /// Background task that handles the actual socket I/O
    async fn connection_task(
        mut framed: Framed<UnixStream, ClientCodec>,
        mut outgoing: mpsc::Receiver<ClientMessage>,
        incoming: mpsc::Sender<ServerMessage>,
    ) {
        loop {
            tokio::select! {
                Some(msg) = outgoing.recv() => {
                    let type_name = msg.type_name();
                    if let Err(e) = framed.send(msg).await {
                        error!(message_type = type_name, "Failed to send message: {}", e);
                        break;
                    }
                }

                result = framed.next() => {
                    match result {
                        Some(Ok(msg)) => {
                            debug!(message_type = msg.type_name(), "Received message from server");
                            if incoming.send(msg).await.is_err() {
                                debug!("Incoming channel closed, receiver dropped");
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            error!("Failed to receive message: {}", e);
                            break;
                        }
                        None => {
                            info!("Server closed connection");
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}
