//! Pane geometry, content and structure handlers

use tracing::{debug, warn};

use reflow_protocol::{
    Dimensions, DomainId, ErrorCode, Generation, LineRange, PaneId, ServerMessage, SplitDirection,
};

use super::{HandlerContext, HandlerResult};
use crate::domain::{DomainError, DomainManager};
use crate::notify::ResizeSource;

impl HandlerContext {
    /// Handle SizeOnlyUpdate
    ///
    /// The ack carries the domain fingerprint so the client can tell whether
    /// its cached topology is still right. A signal is raised even when the
    /// size did not change: the sender counts on seeing a `PaneResized` for
    /// every update it sends.
    pub fn handle_size_update(
        &self,
        attached: DomainId,
        pane_id: PaneId,
        cols: u16,
        rows: u16,
    ) -> HandlerResult {
        if cols == 0 || rows == 0 {
            return Self::error(
                ErrorCode::InvalidOperation,
                format!("invalid size {}x{} for pane {}", cols, rows, pane_id),
            );
        }

        let fingerprint = {
            let mut domains = self.domains.write();
            if let Err(e) = check_owner(&domains, attached, pane_id) {
                return e.into();
            }
            if let Err(e) = domains.resize_pane(pane_id, Dimensions::new(cols, rows)) {
                return e.into();
            }
            match domains.fingerprint(attached) {
                Ok(fingerprint) => fingerprint,
                Err(e) => return e.into(),
            }
        };

        if !self.signals.raise(pane_id, ResizeSource::ClientRequest) {
            warn!(pane_id = %pane_id, "Notification coalescer is gone");
        }

        HandlerResult::Response(ServerMessage::SizeUpdated {
            pane_id,
            cols,
            rows,
            topology_fingerprint: fingerprint,
        })
    }

    /// Handle FetchRequest
    pub fn handle_fetch(
        &self,
        attached: DomainId,
        pane_id: PaneId,
        generation: Generation,
        ranges: Vec<LineRange>,
    ) -> HandlerResult {
        if let Err(e) = check_owner(&self.domains.read(), attached, pane_id) {
            return e.into();
        }
        match self
            .responder
            .respond(self.client_id, pane_id, generation, &ranges)
        {
            Ok(response) => HandlerResult::Response(response),
            Err(e) => e.into(),
        }
    }

    /// Handle SplitPane
    pub fn handle_split(
        &self,
        attached: DomainId,
        pane_id: PaneId,
        direction: SplitDirection,
    ) -> HandlerResult {
        let outcome = {
            let mut domains = self.domains.write();
            if let Err(e) = check_owner(&domains, attached, pane_id) {
                return e.into();
            }
            match domains.split_pane(pane_id, direction) {
                Ok(outcome) => outcome,
                Err(e) => return e.into(),
            }
        };
        debug!(
            client = %self.client_id,
            parent = %outcome.parent,
            new_pane = %outcome.new_pane,
            "Split handled"
        );
        self.signals.raise(outcome.parent, ResizeSource::Split);
        topology_changed(outcome.domain_id)
    }

    /// Handle ClosePane
    pub fn handle_close(&self, attached: DomainId, pane_id: PaneId) -> HandlerResult {
        let outcome = {
            let mut domains = self.domains.write();
            if let Err(e) = check_owner(&domains, attached, pane_id) {
                return e.into();
            }
            match domains.close_pane(pane_id) {
                Ok(outcome) => outcome,
                Err(e) => return e.into(),
            }
        };
        self.signals.raise(outcome.parent, ResizeSource::Layout);
        topology_changed(outcome.domain_id)
    }
}

/// Panes are only reachable through the domain the client is attached to
fn check_owner(
    domains: &DomainManager,
    attached: DomainId,
    pane_id: PaneId,
) -> Result<(), DomainError> {
    match domains.domain_of(pane_id) {
        Some(domain_id) if domain_id == attached => Ok(()),
        _ => Err(DomainError::PaneNotFound(pane_id)),
    }
}

fn topology_changed(domain_id: DomainId) -> HandlerResult {
    let msg = ServerMessage::TopologyChanged { domain_id };
    HandlerResult::ResponseWithBroadcast {
        response: msg.clone(),
        domain_id,
        broadcast: msg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::{connect, create_test_context};
    use reflow_protocol::ClientMessage;

    #[tokio::test]
    async fn test_size_update_acks_with_fingerprint_and_raises() {
        let mut t = create_test_context();
        connect(&t.ctx).await;

        let result = t
            .ctx
            .route_message(ClientMessage::SizeOnlyUpdate {
                pane_id: t.root,
                cols: 80,
                rows: 50,
            })
            .await;
        let expected = t.ctx.domains.read().fingerprint(t.domain).unwrap();
        match result {
            HandlerResult::Response(ServerMessage::SizeUpdated {
                pane_id,
                cols,
                rows,
                topology_fingerprint,
            }) => {
                assert_eq!((pane_id, cols, rows), (t.root, 80, 50));
                assert_eq!(topology_fingerprint, expected);
            }
            other => panic!("Expected SizeUpdated, got {:?}", other),
        }

        let signal = t.signals.try_recv().unwrap();
        assert_eq!(signal.pane_id, t.root);
        assert_eq!(signal.source, ResizeSource::ClientRequest);
        assert_eq!(
            t.ctx.domains.read().find_pane(t.root).unwrap().dimensions(),
            Dimensions::new(80, 50)
        );
    }

    #[tokio::test]
    async fn test_unchanged_size_still_raises() {
        let mut t = create_test_context();
        connect(&t.ctx).await;
        t.ctx.handle_size_update(t.domain, t.root, 80, 24);
        assert!(t.signals.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_zero_size_rejected() {
        let mut t = create_test_context();
        connect(&t.ctx).await;
        match t.ctx.handle_size_update(t.domain, t.root, 0, 24) {
            HandlerResult::Response(ServerMessage::Error {
                code: ErrorCode::InvalidOperation,
                ..
            }) => {}
            other => panic!("Expected InvalidOperation, got {:?}", other),
        }
        assert!(t.signals.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pane_outside_attached_domain() {
        let t = create_test_context();
        connect(&t.ctx).await;
        let other = t.ctx.domains.write().create_domain();
        let foreign = t.ctx.domains.read().domain(other).unwrap().root();

        match t.ctx.handle_size_update(t.domain, foreign, 80, 24) {
            HandlerResult::Response(ServerMessage::Error {
                code: ErrorCode::PaneNotFound,
                ..
            }) => {}
            other => panic!("Expected PaneNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_returns_requested_rows() {
        let t = create_test_context();
        connect(&t.ctx).await;
        t.ctx
            .domains
            .write()
            .write_lines(t.root, (0..30).map(|i| format!("line {}", i)))
            .unwrap();

        let result = t
            .ctx
            .route_message(ClientMessage::FetchRequest {
                pane_id: t.root,
                generation: Generation(2),
                ranges: vec![LineRange::new(6, 30)],
            })
            .await;
        match result {
            HandlerResult::Response(ServerMessage::FetchResponse {
                generation,
                total_lines,
                ranges,
                ..
            }) => {
                assert_eq!(generation, Generation(2));
                assert_eq!(total_lines, 30);
                assert_eq!(ranges[0].lines.len(), 24);
                assert_eq!(ranges[0].lines[0], "line 6");
            }
            other => panic!("Expected FetchResponse, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_split_changes_topology_and_raises() {
        let mut t = create_test_context();
        connect(&t.ctx).await;
        let before = t.ctx.domains.read().fingerprint(t.domain).unwrap();

        let result = t
            .ctx
            .route_message(ClientMessage::SplitPane {
                pane_id: t.root,
                direction: SplitDirection::Vertical,
            })
            .await;
        match result {
            HandlerResult::ResponseWithBroadcast {
                response: ServerMessage::TopologyChanged { domain_id },
                domain_id: target,
                ..
            } => {
                assert_eq!(domain_id, t.domain);
                assert_eq!(target, t.domain);
            }
            other => panic!("Expected TopologyChanged, got {:?}", other),
        }
        assert_ne!(t.ctx.domains.read().fingerprint(t.domain).unwrap(), before);
        assert_eq!(t.signals.try_recv().unwrap().source, ResizeSource::Split);
    }

    #[tokio::test]
    async fn test_close_root_rejected() {
        let t = create_test_context();
        connect(&t.ctx).await;
        match t.ctx.handle_close(t.domain, t.root) {
            HandlerResult::Response(ServerMessage::Error {
                code: ErrorCode::InvalidOperation,
                ..
            }) => {}
            other => panic!("Expected InvalidOperation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_child_raises_layout() {
        let mut t = create_test_context();
        connect(&t.ctx).await;
        let child = t
            .ctx
            .domains
            .write()
            .split_pane(t.root, SplitDirection::Horizontal)
            .unwrap()
            .new_pane;

        assert!(matches!(
            t.ctx.handle_close(t.domain, child),
            HandlerResult::ResponseWithBroadcast { .. }
        ));
        let signal = t.signals.try_recv().unwrap();
        assert_eq!(signal.pane_id, t.root);
        assert_eq!(signal.source, ResizeSource::Layout);
    }
}
