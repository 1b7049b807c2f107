//! Outgoing message handle

use tokio::sync::mpsc;

use reflow_protocol::ClientMessage;
use reflow_utils::{ReflowError, Result};

/// Clonable message sender
#[derive(Debug, Clone)]
pub struct MessageSender {
    tx: mpsc::Sender<ClientMessage>,
}

impl MessageSender {
    pub fn new(tx: mpsc::Sender<ClientMessage>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| ReflowError::ConnectionClosed)?;
        Ok(())
    }

    /// Send without waiting (fire and forget)
    pub fn send_nowait(&self, msg: ClientMessage) {
        let _ = self.tx.try_send(msg);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
