//! Client view of a domain's pane structure
//!
//! Mirrors the last pane list the server sent, the fingerprint it confirmed,
//! and whether anything since then may have changed the split structure.

use std::collections::HashMap;

use tracing::debug;

use reflow_protocol::{
    topology_fingerprint, Dimensions, DomainId, PaneEntry, PaneId, SplitDirection,
    TopologyFingerprint, TopologyNode,
};
use reflow_utils::{ReflowError, Result};

/// Cached geometry of one pane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaneGeometry {
    pub parent: Option<PaneId>,
    pub split: Option<SplitDirection>,
    pub dimensions: Dimensions,
    pub total_lines: u64,
}

/// What a resync changed relative to the previous pane list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyDiff {
    pub added: Vec<PaneEntry>,
    pub removed: Vec<PaneId>,
    /// Panes whose size the server changed, with the new size
    pub resized: Vec<(PaneId, Dimensions)>,
}

#[derive(Debug)]
pub struct TopologyState {
    domain_id: DomainId,
    panes: HashMap<PaneId, PaneGeometry>,
    /// Fingerprint the server last confirmed for the domain
    confirmed: Option<TopologyFingerprint>,
    /// Set when a structural change may have happened since `confirmed`
    dirty: bool,
}

impl TopologyState {
    pub fn new(domain_id: DomainId) -> Self {
        Self {
            domain_id,
            panes: HashMap::new(),
            confirmed: None,
            dirty: false,
        }
    }

    pub fn domain_id(&self) -> DomainId {
        self.domain_id
    }

    /// Fingerprint of the structure as cached locally
    pub fn fingerprint(&self) -> TopologyFingerprint {
        topology_fingerprint(self.panes.iter().map(|(pane_id, geometry)| TopologyNode {
            pane_id: *pane_id,
            parent: geometry.parent,
            split: geometry.split,
        }))
    }

    pub fn confirmed_fingerprint(&self) -> Option<TopologyFingerprint> {
        self.confirmed
    }

    pub fn is_synced(&self) -> bool {
        self.confirmed.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self, reason: &str) {
        if !self.dirty {
            debug!(domain_id = %self.domain_id, reason, "Topology marked dirty");
        }
        self.dirty = true;
    }

    pub fn contains(&self, pane_id: PaneId) -> bool {
        self.panes.contains_key(&pane_id)
    }

    pub fn geometry(&self, pane_id: PaneId) -> Option<&PaneGeometry> {
        self.panes.get(&pane_id)
    }

    pub fn pane_ids(&self) -> Vec<PaneId> {
        let mut ids: Vec<PaneId> = self.panes.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Root pane of the domain (the one not split from anything)
    pub fn root(&self) -> Option<PaneId> {
        self.panes
            .iter()
            .filter(|(_, geometry)| geometry.parent.is_none())
            .map(|(pane_id, _)| *pane_id)
            .min()
    }

    pub fn len(&self) -> usize {
        self.panes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panes.is_empty()
    }

    /// Record a size the server will apply without touching structure
    pub fn apply_size_only(&mut self, pane_id: PaneId, dimensions: Dimensions) -> bool {
        match self.panes.get_mut(&pane_id) {
            Some(geometry) => {
                geometry.dimensions = dimensions;
                true
            }
            None => false,
        }
    }

    /// Replace the cached structure with a full pane list from the server
    ///
    /// The server's fingerprint must match the one computed from the list
    /// it sent; anything else is a malformed response.
    pub fn apply_resync(
        &mut self,
        panes: &[PaneEntry],
        server_fingerprint: TopologyFingerprint,
    ) -> Result<TopologyDiff> {
        let computed = topology_fingerprint(panes.iter().map(PaneEntry::node));
        if computed != server_fingerprint {
            return Err(ReflowError::fatal(format!(
                "pane list for domain {} hashes to {} but server claims {}",
                self.domain_id, computed, server_fingerprint
            )));
        }

        let mut diff = TopologyDiff::default();
        let mut next = HashMap::with_capacity(panes.len());
        for entry in panes {
            match self.panes.get(&entry.pane_id) {
                None => diff.added.push(entry.clone()),
                Some(old) if old.dimensions != entry.dimensions => {
                    diff.resized.push((entry.pane_id, entry.dimensions))
                }
                Some(_) => {}
            }
            next.insert(
                entry.pane_id,
                PaneGeometry {
                    parent: entry.parent,
                    split: entry.split,
                    dimensions: entry.dimensions,
                    total_lines: entry.total_lines,
                },
            );
        }
        diff.removed = self
            .panes
            .keys()
            .filter(|pane_id| !next.contains_key(*pane_id))
            .copied()
            .collect();
        diff.removed.sort();

        self.panes = next;
        self.confirmed = Some(server_fingerprint);
        self.dirty = false;
        Ok(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pane_id: PaneId, parent: Option<PaneId>, cols: u16, rows: u16) -> PaneEntry {
        PaneEntry {
            pane_id,
            parent,
            split: parent.map(|_| SplitDirection::Vertical),
            dimensions: Dimensions::new(cols, rows),
            total_lines: 100,
        }
    }

    fn fingerprint_of(panes: &[PaneEntry]) -> TopologyFingerprint {
        topology_fingerprint(panes.iter().map(PaneEntry::node))
    }

    #[test]
    fn test_fresh_state_is_unsynced() {
        let state = TopologyState::new(DomainId::new());
        assert!(!state.is_synced());
        assert!(!state.is_dirty());
        assert!(state.is_empty());
        assert_eq!(state.root(), None);
    }

    #[test]
    fn test_resync_diff() {
        let mut state = TopologyState::new(DomainId::new());
        let root = PaneId::new();
        let child = PaneId::new();

        let first = vec![entry(root, None, 80, 24)];
        let diff = state.apply_resync(&first, fingerprint_of(&first)).unwrap();
        assert_eq!(diff.added.len(), 1);
        assert!(state.is_synced());
        assert_eq!(state.root(), Some(root));

        state.mark_dirty("split");
        let second = vec![entry(root, None, 80, 12), entry(child, Some(root), 80, 12)];
        let diff = state.apply_resync(&second, fingerprint_of(&second)).unwrap();
        assert_eq!(diff.added.iter().map(|e| e.pane_id).collect::<Vec<_>>(), vec![child]);
        assert_eq!(diff.resized, vec![(root, Dimensions::new(80, 12))]);
        assert!(diff.removed.is_empty());
        assert!(!state.is_dirty());
        assert_eq!(state.fingerprint(), fingerprint_of(&second));

        let third = vec![entry(root, None, 80, 24)];
        let diff = state.apply_resync(&third, fingerprint_of(&third)).unwrap();
        assert_eq!(diff.removed, vec![child]);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_size_only_keeps_fingerprint() {
        let mut state = TopologyState::new(DomainId::new());
        let root = PaneId::new();
        let panes = vec![entry(root, None, 80, 24)];
        state.apply_resync(&panes, fingerprint_of(&panes)).unwrap();

        let before = state.fingerprint();
        assert!(state.apply_size_only(root, Dimensions::new(120, 50)));
        assert_eq!(state.fingerprint(), before);
        assert_eq!(
            state.geometry(root).map(|g| g.dimensions),
            Some(Dimensions::new(120, 50))
        );
        assert!(!state.apply_size_only(PaneId::new(), Dimensions::new(1, 1)));
    }

    #[test]
    fn test_mismatched_server_fingerprint_is_fatal() {
        let mut state = TopologyState::new(DomainId::new());
        let panes = vec![entry(PaneId::new(), None, 80, 24)];
        let err = state
            .apply_resync(&panes, TopologyFingerprint(0xdead))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(!state.is_synced());
    }
}
