//! Message handlers for client requests
//!
//! Routes incoming `ClientMessage`s to the handler for their concern and
//! turns the outcome into `ServerMessage`s for the caller and, for
//! topology changes, the other clients of the domain.

mod connection;
mod domain;
mod pane;

use std::sync::Arc;

use reflow_protocol::{ClientMessage, DomainId, ErrorCode, ServerMessage};
use tracing::trace;

use crate::domain::{DomainError, SharedDomains};
use crate::notify::ResizeSignalSender;
use crate::registry::{ClientId, ClientRegistry};
use crate::responder::RenderChangeResponder;

/// Everything a handler needs to serve one client
#[derive(Clone)]
pub struct HandlerContext {
    pub domains: SharedDomains,
    pub registry: Arc<ClientRegistry>,
    pub responder: Arc<RenderChangeResponder>,
    /// Raise side of the notification coalescer
    pub signals: ResizeSignalSender,
    /// The client making this request
    pub client_id: ClientId,
}

/// Result of handling a message
#[derive(Debug)]
pub enum HandlerResult {
    /// Single response to send back to the client
    Response(ServerMessage),
    /// Response to the client plus a broadcast to the rest of the domain
    ResponseWithBroadcast {
        response: ServerMessage,
        domain_id: DomainId,
        broadcast: ServerMessage,
    },
    NoResponse,
}

impl HandlerContext {
    pub fn new(
        domains: SharedDomains,
        registry: Arc<ClientRegistry>,
        responder: Arc<RenderChangeResponder>,
        signals: ResizeSignalSender,
        client_id: ClientId,
    ) -> Self {
        Self {
            domains,
            registry,
            responder,
            signals,
            client_id,
        }
    }

    /// Route a client message to the appropriate handler
    pub async fn route_message(&self, msg: ClientMessage) -> HandlerResult {
        trace!(client = %self.client_id, message_type = msg.type_name(), "Routing message");
        match msg {
            ClientMessage::Connect {
                client_id,
                protocol_version,
                domain_id,
            } => self.handle_connect(client_id, protocol_version, domain_id),

            ClientMessage::Ping => HandlerResult::Response(ServerMessage::Pong),

            other => {
                let Some(attached) = self.registry.client_domain(self.client_id) else {
                    return Self::error(
                        ErrorCode::NotConnected,
                        format!("{} before Connect", other.type_name()),
                    );
                };
                self.route_attached(other, attached)
            }
        }
    }

    fn route_attached(&self, msg: ClientMessage, attached: DomainId) -> HandlerResult {
        match msg {
            ClientMessage::SizeOnlyUpdate {
                pane_id,
                cols,
                rows,
            } => self.handle_size_update(attached, pane_id, cols, rows),

            ClientMessage::ResyncRequest { domain_id } => self.handle_resync(domain_id),

            ClientMessage::FetchRequest {
                pane_id,
                generation,
                ranges,
            } => self.handle_fetch(attached, pane_id, generation, ranges),

            ClientMessage::SplitPane { pane_id, direction } => {
                self.handle_split(attached, pane_id, direction)
            }

            ClientMessage::ClosePane { pane_id } => self.handle_close(attached, pane_id),

            ClientMessage::Connect { .. } | ClientMessage::Ping => {
                Self::error(ErrorCode::InternalError, "handshake message misrouted")
            }
        }
    }

    /// Create an error response
    pub fn error(code: ErrorCode, message: impl Into<String>) -> HandlerResult {
        HandlerResult::Response(ServerMessage::Error {
            code,
            message: message.into(),
        })
    }
}

impl From<ServerMessage> for HandlerResult {
    fn from(msg: ServerMessage) -> Self {
        HandlerResult::Response(msg)
    }
}

impl From<DomainError> for HandlerResult {
    fn from(err: DomainError) -> Self {
        HandlerContext::error(err.code(), err.to_string())
    }
}
