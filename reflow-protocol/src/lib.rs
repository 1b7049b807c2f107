//! reflow-protocol: Shared RPC definitions for client-server communication
//!
//! This crate defines the logical messages exchanged while synchronizing
//! pane geometry and screen contents, the data types they carry, and the
//! length-prefixed framing used on the wire.

pub mod codec;
pub mod messages;
pub mod types;

// Re-export main types at crate root
pub use codec::{ClientCodec, CodecError, ServerCodec};
pub use messages::{ClientMessage, ErrorCode, ServerMessage};
pub use types::{
    merge_ranges, rows_to_ranges, topology_fingerprint, total_rows, Dimensions, DomainId,
    Generation, LineRange, PaneEntry, PaneId, RangeContent, SplitDirection, StableRow,
    TopologyFingerprint, TopologyNode,
};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;
