//! Server-side pane state

use std::collections::HashMap;

use reflow_protocol::{Dimensions, Generation, PaneEntry, PaneId, SplitDirection, TopologyNode};

use super::scrollback::ScrollbackBuffer;
use crate::registry::ClientId;

/// A pane as the server sees it
#[derive(Debug)]
pub struct ServerPane {
    id: PaneId,
    parent: Option<PaneId>,
    split: Option<SplitDirection>,
    dimensions: Dimensions,
    scrollback: ScrollbackBuffer,
    /// Latest fetch generation seen from each client
    observed: HashMap<ClientId, Generation>,
}

impl ServerPane {
    pub fn new(dimensions: Dimensions, scrollback_lines: usize) -> Self {
        Self::with_parent(None, None, dimensions, scrollback_lines)
    }

    pub fn with_parent(
        parent: Option<PaneId>,
        split: Option<SplitDirection>,
        dimensions: Dimensions,
        scrollback_lines: usize,
    ) -> Self {
        Self {
            id: PaneId::new(),
            parent,
            split,
            dimensions,
            scrollback: ScrollbackBuffer::new(scrollback_lines),
            observed: HashMap::new(),
        }
    }

    pub fn id(&self) -> PaneId {
        self.id
    }

    pub fn parent(&self) -> Option<PaneId> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<PaneId>) {
        self.parent = parent;
    }

    pub fn split(&self) -> Option<SplitDirection> {
        self.split
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Apply new geometry; returns whether anything changed
    pub fn resize(&mut self, dimensions: Dimensions) -> bool {
        if self.dimensions == dimensions {
            return false;
        }
        self.dimensions = dimensions;
        true
    }

    pub fn scrollback(&self) -> &ScrollbackBuffer {
        &self.scrollback
    }

    pub fn scrollback_mut(&mut self) -> &mut ScrollbackBuffer {
        &mut self.scrollback
    }

    pub fn total_lines(&self) -> u64 {
        self.scrollback.total_lines()
    }

    /// Record a fetch generation from `client`, keeping the highest seen
    pub fn observe(&mut self, client: ClientId, generation: Generation) -> Generation {
        let entry = self.observed.entry(client).or_insert(generation);
        if generation > *entry {
            *entry = generation;
        }
        *entry
    }

    pub fn observed(&self, client: ClientId) -> Option<Generation> {
        self.observed.get(&client).copied()
    }

    /// Drop per-client bookkeeping once the client goes away
    pub fn forget_client(&mut self, client: ClientId) {
        self.observed.remove(&client);
    }

    pub fn node(&self) -> TopologyNode {
        TopologyNode {
            pane_id: self.id,
            parent: self.parent,
            split: self.split,
        }
    }

    pub fn entry(&self) -> PaneEntry {
        PaneEntry {
            pane_id: self.id,
            parent: self.parent,
            split: self.split,
            dimensions: self.dimensions,
            total_lines: self.total_lines(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_reports_change() {
        let mut pane = ServerPane::new(Dimensions::new(80, 24), 100);
        assert!(!pane.resize(Dimensions::new(80, 24)));
        assert!(pane.resize(Dimensions::new(100, 24)));
        assert_eq!(pane.dimensions(), Dimensions::new(100, 24));
    }

    #[test]
    fn test_observe_keeps_highest_per_client() {
        let mut pane = ServerPane::new(Dimensions::new(80, 24), 100);
        let a = ClientId::new(1);
        let b = ClientId::new(2);

        assert_eq!(pane.observe(a, Generation(4)), Generation(4));
        assert_eq!(pane.observe(a, Generation(3)), Generation(4));
        assert_eq!(pane.observe(b, Generation(1)), Generation(1));
        assert_eq!(pane.observed(a), Some(Generation(4)));

        pane.forget_client(a);
        assert_eq!(pane.observed(a), None);
        assert_eq!(pane.observed(b), Some(Generation(1)));
    }

    #[test]
    fn test_entry_reflects_content() {
        let mut pane = ServerPane::new(Dimensions::new(80, 24), 100);
        pane.scrollback_mut().push_line("hello".into());
        let entry = pane.entry();
        assert_eq!(entry.pane_id, pane.id());
        assert_eq!(entry.parent, None);
        assert_eq!(entry.total_lines, 1);
        assert_eq!(entry.node(), pane.node());
    }
}
