//! Answers fetch requests with generation-stamped line content
//!
//! On arrival a request raises the pane's observed generation for that
//! client. The content snapshot and the generation it is stamped with are
//! then read under one lock, so the stamp always names the state the lines
//! were actually taken from. Whether that is still relevant is the
//! client's call.

use reflow_protocol::{total_rows, Generation, LineRange, PaneId, RangeContent, ServerMessage};
use tracing::{debug, trace};

use crate::domain::{DomainError, DomainResult, SharedDomains};
use crate::registry::ClientId;

/// Upper bound on rows served by one request
pub const MAX_FETCH_ROWS: u64 = 65_536;

pub struct RenderChangeResponder {
    domains: SharedDomains,
}

impl RenderChangeResponder {
    pub fn new(domains: SharedDomains) -> Self {
        Self { domains }
    }

    /// Note that `client` asked for `generation`; returns the observed value
    pub fn record(
        &self,
        client: ClientId,
        pane_id: PaneId,
        generation: Generation,
    ) -> DomainResult<Generation> {
        let mut domains = self.domains.write();
        let pane = domains
            .find_pane_mut(pane_id)
            .ok_or(DomainError::PaneNotFound(pane_id))?;
        Ok(pane.observe(client, generation))
    }

    /// Snapshot `ranges` and stamp them with the observed generation
    pub fn compute(
        &self,
        client: ClientId,
        pane_id: PaneId,
        ranges: &[LineRange],
    ) -> DomainResult<ServerMessage> {
        let domains = self.domains.read();
        let pane = domains
            .find_pane(pane_id)
            .ok_or(DomainError::PaneNotFound(pane_id))?;
        let generation = pane.observed(client).unwrap_or(Generation::INITIAL);

        let scrollback = pane.scrollback();
        let contents: Vec<RangeContent> = ranges
            .iter()
            .map(|range| RangeContent {
                range: *range,
                lines: scrollback.read_range(range),
            })
            .collect();

        trace!(
            pane_id = %pane_id,
            %generation,
            ranges = contents.len(),
            "Computed fetch response"
        );

        Ok(ServerMessage::FetchResponse {
            pane_id,
            generation,
            total_lines: scrollback.total_lines(),
            ranges: contents,
        })
    }

    /// Record then compute, the whole FetchRequest path
    pub fn respond(
        &self,
        client: ClientId,
        pane_id: PaneId,
        generation: Generation,
        ranges: &[LineRange],
    ) -> DomainResult<ServerMessage> {
        match total_rows(ranges) {
            Some(rows) if rows <= MAX_FETCH_ROWS => {}
            Some(rows) => {
                return Err(DomainError::InvalidOperation(format!(
                    "fetch of {} rows exceeds {}",
                    rows, MAX_FETCH_ROWS
                )));
            }
            None => {
                return Err(DomainError::InvalidOperation("fetch row count overflows".into()));
            }
        }
        let observed = self.record(client, pane_id, generation)?;
        if observed != generation {
            debug!(
                pane_id = %pane_id,
                requested = %generation,
                %observed,
                "Request overtaken by a newer generation"
            );
        }
        self.compute(client, pane_id, ranges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainManager;

    fn responder_with_lines(count: u64) -> (RenderChangeResponder, PaneId) {
        let domains = DomainManager::shared(Default::default());
        let root = {
            let mut manager = domains.write();
            let domain = manager.default_domain();
            let root = manager.domain(domain).unwrap().root();
            manager
                .write_lines(root, (0..count).map(|i| format!("row {}", i)))
                .unwrap();
            root
        };
        (RenderChangeResponder::new(domains), root)
    }

    fn unpack(msg: ServerMessage) -> (Generation, u64, Vec<RangeContent>) {
        match msg {
            ServerMessage::FetchResponse {
                generation,
                total_lines,
                ranges,
                ..
            } => (generation, total_lines, ranges),
            other => panic!("expected FetchResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_viewport_fetch_in_deep_scrollback() {
        let (responder, pane) = responder_with_lines(100_000);
        let client = ClientId::new(1);
        let range = LineRange::new(99_950, 99_976);

        let (generation, total, ranges) =
            unpack(responder.respond(client, pane, Generation(2), &[range]).unwrap());
        assert_eq!(generation, Generation(2));
        assert_eq!(total, 100_000);
        assert_eq!(ranges.len(), 1);
        assert!(ranges[0].is_complete());
        assert_eq!(ranges[0].lines[0], "row 99950");
        assert_eq!(ranges[0].lines[25], "row 99975");
    }

    #[test]
    fn test_rows_beyond_content_are_empty() {
        let (responder, pane) = responder_with_lines(10);
        let (_, total, ranges) = unpack(
            responder
                .respond(ClientId::new(1), pane, Generation(1), &[LineRange::new(8, 12)])
                .unwrap(),
        );
        assert_eq!(total, 10);
        assert_eq!(ranges[0].lines, vec!["row 8", "row 9", "", ""]);
    }

    #[test]
    fn test_stamp_follows_observed_generation() {
        let (responder, pane) = responder_with_lines(10);
        let client = ClientId::new(1);
        let range = [LineRange::new(0, 2)];

        // A newer request was recorded before the older one was computed
        responder.record(client, pane, Generation(4)).unwrap();
        let (generation, _, _) =
            unpack(responder.respond(client, pane, Generation(3), &range).unwrap());
        assert_eq!(generation, Generation(4));

        // Other clients keep their own counters
        let (generation, _, _) = unpack(
            responder
                .respond(ClientId::new(2), pane, Generation(1), &range)
                .unwrap(),
        );
        assert_eq!(generation, Generation(1));
    }

    #[test]
    fn test_unknown_pane() {
        let (responder, _) = responder_with_lines(1);
        let missing = PaneId::new();
        assert_eq!(
            responder
                .respond(ClientId::new(1), missing, Generation(1), &[])
                .unwrap_err(),
            DomainError::PaneNotFound(missing)
        );
    }

    #[test]
    fn test_oversized_fetch_rejected() {
        let (responder, pane) = responder_with_lines(1);
        let err = responder
            .respond(
                ClientId::new(1),
                pane,
                Generation(1),
                &[LineRange::new(0, MAX_FETCH_ROWS + 1)],
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidOperation(_)));
    }

    #[test]
    fn test_overflowing_fetch_rejected() {
        let (responder, pane) = responder_with_lines(1);
        // Lengths wrap to 5 when summed without a check
        let ranges = [LineRange::new(0, 1 << 63), LineRange::new(0, (1 << 63) + 5)];
        let err = responder
            .respond(ClientId::new(1), pane, Generation(1), &ranges)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidOperation(_)));
        let domains = responder.domains.read();
        assert_eq!(domains.find_pane(pane).unwrap().observed(ClientId::new(1)), None);
    }
}
