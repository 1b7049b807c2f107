//! Client side of the resize pipeline
//!
//! Raw resize events flow through these stages:
//!
//! ```text
//! ResizeEvent -> ResizeDebouncer -> SettledResize
//!     -> ResizeNotifier (SizeOnlyUpdate or resync)
//!     -> ViewportInvalidationTracker -> InvalidationRange
//!     -> FetchCoalescer -> FetchRequest / FetchResponse -> RenderCache
//! ```

mod cache;
mod debounce;
mod fetch;
mod invalidation;
mod notifier;
mod topology;

pub use cache::{CacheStats, CachedLine, RenderCache};
pub use debounce::{ResizeDebouncer, ResizeEvent, SettledResize, DEFAULT_DEBOUNCE_MS};
pub use fetch::{
    ExpiredFetch, FetchCoalescer, FetchOutcome, FetchRequest, FetchStats,
    DEFAULT_FETCH_COALESCE_MS, DEFAULT_RPC_TIMEOUT_MS,
};
pub use invalidation::{
    invalidated_rows, InvalidationRange, NoReflow, PaneView, ReflowOracle,
    ViewportInvalidationTracker,
};
pub use notifier::{
    AckOutcome, Dispatch, ExpiredControl, NotifierStats, ResizeDecision, ResizeNotifier,
};
pub use topology::{PaneGeometry, TopologyDiff, TopologyState};
