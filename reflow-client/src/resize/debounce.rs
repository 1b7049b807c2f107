//! Resize debouncing
//!
//! The windowing layer reports every intermediate size while a window edge is
//! dragged. The debouncer collapses those bursts into a single settled resize
//! per pane once the pane has been quiet for the configured window, and drops
//! the burst entirely when it ends where it started.
//!
//! The debouncer is a plain state machine driven by the pipeline task: it
//! reports the earliest pending deadline and emits settled resizes when asked
//! with the current time.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use reflow_protocol::{Dimensions, PaneId};

/// Default quiet window before a resize is considered settled
pub const DEFAULT_DEBOUNCE_MS: u64 = 50;

/// One raw size report from the windowing layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeEvent {
    pub pane_id: PaneId,
    pub dimensions: Dimensions,
    pub timestamp: Instant,
}

impl ResizeEvent {
    /// Event stamped with the current time
    pub fn new(pane_id: PaneId, cols: u16, rows: u16) -> Self {
        Self::at(pane_id, Dimensions::new(cols, rows), Instant::now())
    }

    pub fn at(pane_id: PaneId, dimensions: Dimensions, timestamp: Instant) -> Self {
        Self {
            pane_id,
            dimensions,
            timestamp,
        }
    }
}

/// A resize that survived the quiet window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettledResize {
    pub pane_id: PaneId,
    /// Size last settled for this pane
    pub old: Dimensions,
    pub new: Dimensions,
}

impl SettledResize {
    pub fn width_changed(&self) -> bool {
        self.old.width_changed(&self.new)
    }
}

#[derive(Debug)]
struct PaneDebounce {
    last_settled: Dimensions,
    pending: Option<Dimensions>,
    deadline: Option<Instant>,
}

/// Collapses bursts of resize events into settled resizes
#[derive(Debug)]
pub struct ResizeDebouncer {
    window: Duration,
    panes: HashMap<PaneId, PaneDebounce>,
    /// Bursts that ended at the size they started from
    suppressed: u64,
}

impl ResizeDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            panes: HashMap::new(),
            suppressed: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Start tracking a pane at its current size
    ///
    /// Tracking an already known pane leaves its state alone.
    pub fn track_pane(&mut self, pane_id: PaneId, current: Dimensions) {
        self.panes.entry(pane_id).or_insert(PaneDebounce {
            last_settled: current,
            pending: None,
            deadline: None,
        });
    }

    /// Replace the settled size without emitting anything
    ///
    /// Used when the server reports geometry it settled on its own, so that
    /// echoing the same size back is recognized as a no-op.
    pub fn set_baseline(&mut self, pane_id: PaneId, dimensions: Dimensions) {
        if let Some(pane) = self.panes.get_mut(&pane_id) {
            pane.last_settled = dimensions;
        }
    }

    /// Stop tracking a pane, cancelling any pending timer
    ///
    /// Returns true if a resize was pending and got cancelled.
    pub fn remove_pane(&mut self, pane_id: PaneId) -> bool {
        self.panes
            .remove(&pane_id)
            .map(|pane| pane.deadline.is_some())
            .unwrap_or(false)
    }

    /// Record a raw event, restarting the pane's quiet window
    ///
    /// Events for panes that are not tracked are dropped; returns whether the
    /// event was accepted.
    pub fn push(&mut self, event: ResizeEvent) -> bool {
        let Some(pane) = self.panes.get_mut(&event.pane_id) else {
            trace!(pane_id = %event.pane_id, "Dropping resize for untracked pane");
            return false;
        };

        pane.pending = Some(event.dimensions);
        pane.deadline = Some(event.timestamp + self.window);
        true
    }

    /// Earliest instant at which some pane settles
    pub fn next_deadline(&self) -> Option<Instant> {
        self.panes.values().filter_map(|pane| pane.deadline).min()
    }

    pub fn is_pending(&self, pane_id: PaneId) -> bool {
        self.panes
            .get(&pane_id)
            .map(|pane| pane.deadline.is_some())
            .unwrap_or(false)
    }

    pub fn last_settled(&self, pane_id: PaneId) -> Option<Dimensions> {
        self.panes.get(&pane_id).map(|pane| pane.last_settled)
    }

    pub fn is_tracked(&self, pane_id: PaneId) -> bool {
        self.panes.contains_key(&pane_id)
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// Emit every resize whose quiet window has elapsed by `now`
    ///
    /// A burst that ends at the last settled size emits nothing.
    pub fn fire_due(&mut self, now: Instant) -> Vec<SettledResize> {
        let mut settled = Vec::new();

        for (pane_id, pane) in self.panes.iter_mut() {
            match pane.deadline {
                Some(deadline) if deadline <= now => {}
                _ => continue,
            }
            pane.deadline = None;

            let Some(new) = pane.pending.take() else {
                continue;
            };
            if new == pane.last_settled {
                trace!(pane_id = %pane_id, size = %new, "Resize burst returned to settled size");
                self.suppressed += 1;
                continue;
            }

            settled.push(SettledResize {
                pane_id: *pane_id,
                old: pane.last_settled,
                new,
            });
            pane.last_settled = new;
        }

        settled.sort_by_key(|s| s.pane_id);
        settled
    }
}
