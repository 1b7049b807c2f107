//! Full resync handling

use tracing::debug;

use reflow_protocol::{DomainId, ServerMessage};

use super::{HandlerContext, HandlerResult};

impl HandlerContext {
    /// Handle ResyncRequest: the complete pane list plus its fingerprint
    pub fn handle_resync(&self, domain_id: DomainId) -> HandlerResult {
        let (panes, topology_fingerprint) = match self.domains.read().pane_list(domain_id) {
            Ok(list) => list,
            Err(e) => return e.into(),
        };
        debug!(
            client = %self.client_id,
            domain_id = %domain_id,
            panes = panes.len(),
            fingerprint = %topology_fingerprint,
            "Serving resync"
        );
        HandlerResult::Response(ServerMessage::ListPanesResponse {
            domain_id,
            panes,
            topology_fingerprint,
        })
    }
}
