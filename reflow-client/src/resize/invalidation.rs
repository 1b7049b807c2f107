//! Viewport invalidation
//!
//! Given a settled resize, works out which stable rows actually need fresh
//! content. A height-only change exposes rows at the top of the viewport and
//! nothing else. A width change rewraps everything on screen plus whatever
//! the reflow oracle reports. Scrollback depth never enters the computation.

use std::cmp::max;

use reflow_protocol::{merge_ranges, rows_to_ranges, Dimensions, LineRange, PaneId, StableRow};

/// Reports which rows rewrap when a pane's width changes
pub trait ReflowOracle: Send {
    fn reflowed_lines(&self, pane_id: PaneId, old: Dimensions, new: Dimensions) -> Vec<StableRow>;
}

/// Oracle for terminals that never rewrap scrollback
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReflow;

impl ReflowOracle for NoReflow {
    fn reflowed_lines(&self, _: PaneId, _: Dimensions, _: Dimensions) -> Vec<StableRow> {
        Vec::new()
    }
}

impl<F> ReflowOracle for F
where
    F: Fn(PaneId, Dimensions, Dimensions) -> Vec<StableRow> + Send,
{
    fn reflowed_lines(&self, pane_id: PaneId, old: Dimensions, new: Dimensions) -> Vec<StableRow> {
        self(pane_id, old, new)
    }
}

/// What the client currently shows for a pane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaneView {
    pub dimensions: Dimensions,
    /// Rows scrolled back from the bottom
    pub scroll_offset: u64,
    /// Stable rows the server holds for the pane
    pub total_lines: u64,
}

impl PaneView {
    pub fn new(dimensions: Dimensions, total_lines: u64) -> Self {
        Self {
            dimensions,
            scroll_offset: 0,
            total_lines,
        }
    }

    /// Row just past the last visible one
    pub fn bottom(&self) -> StableRow {
        self.total_lines.saturating_sub(self.scroll_offset)
    }

    pub fn viewport(&self) -> LineRange {
        viewport_at(self.bottom(), self.dimensions.rows)
    }

    /// Largest scroll offset that still fills the viewport
    pub fn max_scroll_offset(&self) -> u64 {
        self.total_lines
            .saturating_sub(u64::from(self.dimensions.rows))
    }
}

fn viewport_at(bottom: StableRow, rows: u16) -> LineRange {
    let start = bottom.saturating_sub(u64::from(rows));
    LineRange::new(start, start + u64::from(rows))
}

/// Rows of one pane that must be refetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationRange {
    pub pane_id: PaneId,
    pub range: LineRange,
}

/// Computes the minimal invalidation for a settled resize
pub struct ViewportInvalidationTracker {
    oracle: Box<dyn ReflowOracle>,
}

impl ViewportInvalidationTracker {
    pub fn new(oracle: Box<dyn ReflowOracle>) -> Self {
        Self { oracle }
    }

    /// Rows to refetch when `view` changes to `new`
    ///
    /// The result is merged and ordered. It never covers more than the larger
    /// of the two viewports plus the rows the oracle reports as rewrapped.
    pub fn invalidate(
        &self,
        pane_id: PaneId,
        view: &PaneView,
        new: Dimensions,
    ) -> Vec<InvalidationRange> {
        let old = view.dimensions;
        if old == new {
            return Vec::new();
        }

        let bottom = view.bottom();
        let mut ranges = Vec::new();

        if old.width_changed(&new) {
            let visible = viewport_at(bottom, max(old.rows, new.rows));
            ranges.push(visible);

            let limit = max(view.total_lines, visible.end);
            let reflowed = self
                .oracle
                .reflowed_lines(pane_id, old, new)
                .into_iter()
                .filter(|row| *row < limit);
            ranges.extend(rows_to_ranges(reflowed));
        } else {
            // Height only: the rows that were already on screen keep their content
            let before = viewport_at(bottom, old.rows);
            let after = viewport_at(bottom, new.rows);
            let (left, right) = after.subtract(&before);
            ranges.extend(left);
            ranges.extend(right);
        }

        merge_ranges(ranges)
            .into_iter()
            .map(|range| InvalidationRange { pane_id, range })
            .collect()
    }
}

impl Default for ViewportInvalidationTracker {
    fn default() -> Self {
        Self::new(Box::new(NoReflow))
    }
}

impl std::fmt::Debug for ViewportInvalidationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewportInvalidationTracker").finish_non_exhaustive()
    }
}

/// Total rows covered by a set of invalidations
pub fn invalidated_rows(ranges: &[InvalidationRange]) -> u64 {
    ranges.iter().map(|r| r.range.len()).sum()
}
