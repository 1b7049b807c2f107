//! Handshake handling

use tracing::{info, warn};
use uuid::Uuid;

use reflow_protocol::{DomainId, ErrorCode, ServerMessage, PROTOCOL_VERSION};

use super::{HandlerContext, HandlerResult};

impl HandlerContext {
    /// Handle Connect: check the version and attach to a domain
    pub fn handle_connect(
        &self,
        client_uuid: Uuid,
        protocol_version: u32,
        domain_id: Option<DomainId>,
    ) -> HandlerResult {
        if protocol_version != PROTOCOL_VERSION {
            warn!(
                client = %self.client_id,
                client_version = protocol_version,
                server_version = PROTOCOL_VERSION,
                "Protocol version mismatch"
            );
            return Self::error(
                ErrorCode::ProtocolMismatch,
                format!(
                    "client protocol {} does not match server protocol {}",
                    protocol_version, PROTOCOL_VERSION
                ),
            );
        }

        let domain_id = {
            let domains = self.domains.read();
            let domain_id = domain_id.unwrap_or_else(|| domains.default_domain());
            if let Err(e) = domains.domain(domain_id) {
                return e.into();
            }
            domain_id
        };

        self.registry.attach_to_domain(self.client_id, domain_id);
        info!(
            client = %self.client_id,
            client_uuid = %client_uuid,
            domain_id = %domain_id,
            "Client connected"
        );

        HandlerResult::Response(ServerMessage::Connected {
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: PROTOCOL_VERSION,
            domain_id,
        })
    }
}
