//! Client-server message types

use serde::{Deserialize, Serialize};

use uuid::Uuid;

use crate::types::*;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientMessage {
    /// Initial connection handshake
    ///
    /// Without a domain the server attaches the client to its default one.
    Connect {
        client_id: Uuid,
        protocol_version: u32,
        domain_id: Option<DomainId>,
    },

    /// Ping for keepalive
    Ping,

    /// Apply new geometry to an existing pane without touching topology
    SizeOnlyUpdate { pane_id: PaneId, cols: u16, rows: u16 },

    /// Request the full pane list of a domain
    ResyncRequest { domain_id: DomainId },

    /// Request content for a batch of line ranges
    FetchRequest {
        pane_id: PaneId,
        generation: Generation,
        ranges: Vec<LineRange>,
    },

    /// Split an existing pane
    SplitPane {
        pane_id: PaneId,
        direction: SplitDirection,
    },

    /// Close pane
    ClosePane { pane_id: PaneId },
}

impl ClientMessage {
    /// Return the message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::Connect { .. } => "Connect",
            ClientMessage::Ping => "Ping",
            ClientMessage::SizeOnlyUpdate { .. } => "SizeOnlyUpdate",
            ClientMessage::ResyncRequest { .. } => "ResyncRequest",
            ClientMessage::FetchRequest { .. } => "FetchRequest",
            ClientMessage::SplitPane { .. } => "SplitPane",
            ClientMessage::ClosePane { .. } => "ClosePane",
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ServerMessage {
    /// Connection accepted
    Connected {
        server_version: String,
        protocol_version: u32,
        domain_id: DomainId,
    },

    /// Pong response to ping
    Pong,

    /// Acknowledges a SizeOnlyUpdate
    ///
    /// Carries the server's fingerprint of the domain so the client can
    /// detect a topology change it did not know about.
    SizeUpdated {
        pane_id: PaneId,
        cols: u16,
        rows: u16,
        topology_fingerprint: TopologyFingerprint,
    },

    /// Full pane list of a domain, answering a ResyncRequest
    ListPanesResponse {
        domain_id: DomainId,
        panes: Vec<PaneEntry>,
        topology_fingerprint: TopologyFingerprint,
    },

    /// Content for a FetchRequest, stamped with the generation it was
    /// computed against
    FetchResponse {
        pane_id: PaneId,
        generation: Generation,
        total_lines: u64,
        ranges: Vec<RangeContent>,
    },

    /// Pane geometry settled on the server (at most one per coalescing window)
    PaneResized { pane_id: PaneId, cols: u16, rows: u16 },

    /// Split structure of a domain changed (split or close by any client)
    TopologyChanged { domain_id: DomainId },

    /// Error response
    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    /// Return the message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "Connected",
            ServerMessage::Pong => "Pong",
            ServerMessage::SizeUpdated { .. } => "SizeUpdated",
            ServerMessage::ListPanesResponse { .. } => "ListPanesResponse",
            ServerMessage::FetchResponse { .. } => "FetchResponse",
            ServerMessage::PaneResized { .. } => "PaneResized",
            ServerMessage::TopologyChanged { .. } => "TopologyChanged",
            ServerMessage::Error { .. } => "Error",
        }
    }

    /// Pane this message is scoped to, if any
    pub fn pane_id(&self) -> Option<PaneId> {
        match self {
            ServerMessage::SizeUpdated { pane_id, .. }
            | ServerMessage::FetchResponse { pane_id, .. }
            | ServerMessage::PaneResized { pane_id, .. } => Some(*pane_id),
            _ => None,
        }
    }
}

/// Error codes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    DomainNotFound,
    PaneNotFound,
    InvalidOperation,
    ProtocolMismatch,
    /// Client sent a request before Connect
    NotConnected,
    InternalError,
}
