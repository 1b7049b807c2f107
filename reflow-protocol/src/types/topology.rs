//! Topology fingerprinting
//!
//! A fingerprint summarizes the split structure of a domain: which panes
//! exist and how they hang together. Pane sizes are deliberately left out so
//! that a pure resize never changes it. Client and server must agree on the
//! value, so the hash is a fixed FNV-1a rather than a per-process hasher.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::common::{PaneId, SplitDirection};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Marker bytes separating optional fields
const ROOT_MARKER: u8 = 0xff;
const NO_SPLIT: u8 = 0;
const SPLIT_HORIZONTAL: u8 = 1;
const SPLIT_VERTICAL: u8 = 2;

/// Structural description of one pane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopologyNode {
    pub pane_id: PaneId,
    pub parent: Option<PaneId>,
    pub split: Option<SplitDirection>,
}

/// Hash of a domain's pane structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopologyFingerprint(pub u64);

impl fmt::Display for TopologyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

struct Fnv1a(u64);

impl Fnv1a {
    fn new() -> Self {
        Self(FNV_OFFSET_BASIS)
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }
}

/// Compute the fingerprint of a set of panes
///
/// Input order does not matter; nodes are sorted by pane id first.
pub fn topology_fingerprint<I>(nodes: I) -> TopologyFingerprint
where
    I: IntoIterator<Item = TopologyNode>,
{
    let mut nodes: Vec<TopologyNode> = nodes.into_iter().collect();
    nodes.sort_by_key(|n| n.pane_id);

    let mut hasher = Fnv1a::new();
    hasher.write(&(nodes.len() as u64).to_be_bytes());
    for node in &nodes {
        hasher.write(node.pane_id.as_uuid().as_bytes());
        match node.parent {
            Some(parent) => hasher.write(parent.as_uuid().as_bytes()),
            None => hasher.write(&[ROOT_MARKER]),
        }
        let split = match node.split {
            None => NO_SPLIT,
            Some(SplitDirection::Horizontal) => SPLIT_HORIZONTAL,
            Some(SplitDirection::Vertical) => SPLIT_VERTICAL,
        };
        hasher.write(&[split]);
    }
    TopologyFingerprint(hasher.0)
}
