//! Fetch coalescing
//!
//! Batches invalidated ranges into one FetchRequest per pane per flush and
//! tags each request with a fresh generation. Responses are checked against
//! the pane's current generation before they reach the cache:
//!
//! - older generation: stale, dropped without touching any state
//! - current generation: applied
//! - newer generation, or rows that were never requested: fatal
//!
//! A request that times out has its ranges queued again so the retry goes
//! out under a new generation with whatever else is pending by then.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use reflow_protocol::{
    merge_ranges, rows_to_ranges, ClientMessage, Generation, LineRange, PaneId, RangeContent,
    StableRow,
};
use reflow_utils::{ReflowError, Result};

use super::cache::RenderCache;
use super::invalidation::InvalidationRange;

/// Default window for batching ranges before a request goes out
pub const DEFAULT_FETCH_COALESCE_MS: u64 = 8;

/// Default time to wait for a FetchResponse
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 2000;

/// A batched content request ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub pane_id: PaneId,
    pub generation: Generation,
    pub ranges: Vec<LineRange>,
}

impl FetchRequest {
    pub fn into_message(self) -> ClientMessage {
        ClientMessage::FetchRequest {
            pane_id: self.pane_id,
            generation: self.generation,
            ranges: self.ranges,
        }
    }
}

/// Result of handing a FetchResponse to the coalescer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Content written to the cache
    Applied {
        pane_id: PaneId,
        generation: Generation,
        total_lines: u64,
        ranges: Vec<RangeContent>,
    },
    /// Response for a superseded generation
    Stale {
        pane_id: PaneId,
        generation: Generation,
        current: Generation,
    },
    /// Second delivery of a response that was already applied
    Duplicate {
        pane_id: PaneId,
        generation: Generation,
    },
    /// Pane is no longer tracked
    UnknownPane { pane_id: PaneId },
}

/// A request whose response did not arrive in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiredFetch {
    pub pane_id: PaneId,
    pub generation: Generation,
    /// Consecutive timeouts for this pane, including this one
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub requests: u64,
    pub applied: u64,
    pub stale_dropped: u64,
    pub duplicates: u64,
    pub timeouts: u64,
}

#[derive(Debug)]
struct InFlight {
    generation: Generation,
    ranges: Vec<LineRange>,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct PaneFetchState {
    generation: Generation,
    pending: Vec<LineRange>,
    flush_deadline: Option<Instant>,
    in_flight: Option<InFlight>,
    /// Generation whose request timed out and was not re-sent yet
    expired: Option<Generation>,
    /// Last generation written to the cache
    applied: Option<Generation>,
    attempts: u32,
    cache: RenderCache,
}

/// Per-pane batching of content fetches
#[derive(Debug)]
pub struct FetchCoalescer {
    window: Duration,
    rpc_timeout: Duration,
    panes: HashMap<PaneId, PaneFetchState>,
    stats: FetchStats,
}

impl FetchCoalescer {
    pub fn new(window: Duration, rpc_timeout: Duration) -> Self {
        Self {
            window,
            rpc_timeout,
            panes: HashMap::new(),
            stats: FetchStats::default(),
        }
    }

    pub fn register_pane(&mut self, pane_id: PaneId) {
        self.panes.entry(pane_id).or_default();
    }

    /// Forget a pane along with its cache and anything in flight
    pub fn remove_pane(&mut self, pane_id: PaneId) -> bool {
        self.panes.remove(&pane_id).is_some()
    }

    pub fn generation(&self, pane_id: PaneId) -> Option<Generation> {
        self.panes.get(&pane_id).map(|pane| pane.generation)
    }

    pub fn cache(&self, pane_id: PaneId) -> Option<&RenderCache> {
        self.panes.get(&pane_id).map(|pane| &pane.cache)
    }

    pub fn stats(&self) -> FetchStats {
        self.stats
    }

    pub fn has_in_flight(&self, pane_id: PaneId) -> bool {
        self.panes
            .get(&pane_id)
            .map(|pane| pane.in_flight.is_some())
            .unwrap_or(false)
    }

    /// Queue invalidated ranges and drop their cached rows
    ///
    /// Starts the pane's batching window if it is not already running.
    pub fn enqueue(&mut self, ranges: &[InvalidationRange], now: Instant) {
        for inv in ranges {
            if inv.range.is_empty() {
                continue;
            }
            let Some(pane) = self.panes.get_mut(&inv.pane_id) else {
                trace!(pane_id = %inv.pane_id, "Ignoring invalidation for untracked pane");
                continue;
            };
            pane.cache.invalidate(&inv.range);
            pane.pending.push(inv.range);
            pane.flush_deadline.get_or_insert(now + self.window);
        }
    }

    /// Queue rows of `range` that the cache does not hold yet
    pub fn enqueue_missing(&mut self, pane_id: PaneId, range: LineRange, now: Instant) {
        let Some(pane) = self.panes.get_mut(&pane_id) else {
            return;
        };
        let missing: Vec<StableRow> = pane.cache.missing(&range);
        if missing.is_empty() {
            return;
        }
        pane.pending.extend(rows_to_ranges(missing));
        pane.flush_deadline.get_or_insert(now + self.window);
    }

    /// Panes whose batching window has elapsed
    pub fn due_flushes(&self, now: Instant) -> Vec<PaneId> {
        let mut due: Vec<PaneId> = self
            .panes
            .iter()
            .filter(|(_, pane)| matches!(pane.flush_deadline, Some(d) if d <= now))
            .map(|(id, _)| *id)
            .collect();
        due.sort();
        due
    }

    /// Turn everything pending for a pane into one request
    ///
    /// Ranges of a superseded in-flight request travel along, since its
    /// response will now be dropped as stale. Returns None when nothing is
    /// pending.
    pub fn flush(&mut self, pane_id: PaneId, now: Instant) -> Option<FetchRequest> {
        let pane = self.panes.get_mut(&pane_id)?;
        pane.flush_deadline = None;
        if pane.pending.is_empty() {
            return None;
        }

        let mut ranges = std::mem::take(&mut pane.pending);
        if let Some(superseded) = pane.in_flight.take() {
            ranges.extend(superseded.ranges);
        }
        let ranges = merge_ranges(ranges);

        pane.generation = pane.generation.next();
        pane.expired = None;
        pane.in_flight = Some(InFlight {
            generation: pane.generation,
            ranges: ranges.clone(),
            deadline: now + self.rpc_timeout,
        });
        self.stats.requests += 1;

        debug!(
            pane_id = %pane_id,
            generation = %pane.generation,
            ranges = ranges.len(),
            "Flushing fetch request"
        );
        Some(FetchRequest {
            pane_id,
            generation: pane.generation,
            ranges,
        })
    }

    /// Validate a response and apply it if it belongs to the current generation
    pub fn on_response(
        &mut self,
        pane_id: PaneId,
        generation: Generation,
        total_lines: u64,
        ranges: Vec<RangeContent>,
    ) -> Result<FetchOutcome> {
        let Some(pane) = self.panes.get_mut(&pane_id) else {
            return Ok(FetchOutcome::UnknownPane { pane_id });
        };

        if generation < pane.generation {
            self.stats.stale_dropped += 1;
            debug!(
                pane_id = %pane_id,
                generation = %generation,
                current = %pane.generation,
                "Dropping stale fetch response"
            );
            return Ok(FetchOutcome::Stale {
                pane_id,
                generation,
                current: pane.generation,
            });
        }

        if generation > pane.generation {
            return Err(ReflowError::fatal(format!(
                "response for pane {} carries generation {} ahead of {}",
                pane_id, generation, pane.generation
            )));
        }

        // A timed-out request that was never retried still has its ranges
        // pending, so its late answer is the current one
        let late = match &pane.in_flight {
            _ if pane.applied == Some(generation) => None,
            Some(in_flight) if in_flight.generation == generation => Some(false),
            None if pane.expired == Some(generation) => Some(true),
            _ => None,
        };
        let Some(late) = late else {
            self.stats.duplicates += 1;
            return Ok(FetchOutcome::Duplicate {
                pane_id,
                generation,
            });
        };
        let requested = match &pane.in_flight {
            Some(in_flight) if !late => &in_flight.ranges,
            _ => &pane.pending,
        };

        for content in &ranges {
            if !content.is_complete() {
                return Err(ReflowError::fatal(format!(
                    "range {} for pane {} has {} lines",
                    content.range,
                    pane_id,
                    content.lines.len()
                )));
            }
            let covered = content.range.is_empty()
                || requested
                    .iter()
                    .any(|r| r.start <= content.range.start && content.range.end <= r.end);
            if !covered {
                return Err(ReflowError::fatal(format!(
                    "range {} for pane {} was never requested",
                    content.range, pane_id
                )));
            }
        }

        if late {
            let answered: Vec<LineRange> = ranges.iter().map(|c| c.range).collect();
            pane.pending = remaining(&pane.pending, &answered);
            if pane.pending.is_empty() {
                pane.flush_deadline = None;
            }
        }
        pane.in_flight = None;
        pane.expired = None;
        pane.applied = Some(generation);
        pane.attempts = 0;
        for content in &ranges {
            pane.cache.apply(generation, content);
        }
        pane.cache.truncate(total_lines);
        self.stats.applied += 1;

        Ok(FetchOutcome::Applied {
            pane_id,
            generation,
            total_lines,
            ranges,
        })
    }

    /// Expire requests whose deadline passed, queueing their ranges again
    ///
    /// The pending ranges are not flushed here; the caller decides whether
    /// the attempt count still allows an immediate retry.
    pub fn expire(&mut self, now: Instant) -> Vec<ExpiredFetch> {
        let mut expired = Vec::new();
        for (pane_id, pane) in self.panes.iter_mut() {
            let timed_out = matches!(&pane.in_flight, Some(f) if f.deadline <= now);
            if !timed_out {
                continue;
            }
            let Some(in_flight) = pane.in_flight.take() else {
                continue;
            };
            pane.pending.extend(in_flight.ranges);
            pane.expired = Some(in_flight.generation);
            pane.attempts += 1;
            self.stats.timeouts += 1;
            expired.push(ExpiredFetch {
                pane_id: *pane_id,
                generation: in_flight.generation,
                attempt: pane.attempts,
            });
        }
        expired.sort_by_key(|e| e.pane_id);
        expired
    }

    /// Earliest flush or timeout deadline across all panes
    pub fn next_deadline(&self) -> Option<Instant> {
        self.panes
            .values()
            .flat_map(|pane| {
                pane.flush_deadline
                    .into_iter()
                    .chain(pane.in_flight.as_ref().map(|f| f.deadline))
            })
            .min()
    }
}

/// Parts of `pending` not covered by `answered`
fn remaining(pending: &[LineRange], answered: &[LineRange]) -> Vec<LineRange> {
    let mut left = merge_ranges(pending.iter().copied());
    for done in answered {
        left = left
            .iter()
            .flat_map(|range| {
                let (before, after) = range.subtract(done);
                before.into_iter().chain(after)
            })
            .collect();
    }
    left
}
