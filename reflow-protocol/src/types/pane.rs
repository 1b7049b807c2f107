use serde::{Deserialize, Serialize};

use super::common::{Dimensions, PaneId, SplitDirection};
use super::topology::TopologyNode;

/// Pane information as reported by a full resync
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaneEntry {
    pub pane_id: PaneId,
    /// Pane this one was split from (None for the domain root)
    pub parent: Option<PaneId>,
    /// Direction of the split that created this pane
    pub split: Option<SplitDirection>,
    pub dimensions: Dimensions,
    /// Number of stable rows (scrollback plus screen) the pane holds
    pub total_lines: u64,
}

impl PaneEntry {
    /// The structural part of this entry, without geometry
    pub fn node(&self) -> TopologyNode {
        TopologyNode {
            pane_id: self.pane_id,
            parent: self.parent,
            split: self.split,
        }
    }
}
