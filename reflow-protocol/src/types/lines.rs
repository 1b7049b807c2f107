//! Line ranges and generation tags
//!
//! Screen lines are addressed by stable row index: row 0 is the oldest line
//! in the pane's scrollback and indices never shift when the viewport moves.

use std::cmp::{max, min};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable row index within a pane's scrollback plus screen
pub type StableRow = u64;

/// Per-pane staleness token
///
/// Generations only move forward. A response tagged with a generation older
/// than the pane's current one describes a geometry that no longer exists.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Generation(pub u64);

impl Generation {
    pub const INITIAL: Generation = Generation(0);

    pub fn next(self) -> Generation {
        Generation(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Half-open range of stable rows `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineRange {
    pub start: StableRow,
    pub end: StableRow,
}

impl LineRange {
    /// Create a range; an inverted range collapses to empty at `start`
    pub fn new(start: StableRow, end: StableRow) -> Self {
        Self {
            start,
            end: max(start, end),
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, row: StableRow) -> bool {
        row >= self.start && row < self.end
    }

    /// True if the two ranges share at least one row
    pub fn intersects(&self, other: &LineRange) -> bool {
        max(self.start, other.start) < min(self.end, other.end)
    }

    /// True if the ranges overlap or touch end-to-start
    pub fn touches(&self, other: &LineRange) -> bool {
        max(self.start, other.start) <= min(self.end, other.end)
    }

    /// Computes `self - other`, which may leave up to two pieces
    pub fn subtract(&self, other: &LineRange) -> (Option<LineRange>, Option<LineRange>) {
        if !self.intersects(other) {
            return if self.is_empty() {
                (None, None)
            } else {
                (Some(*self), None)
            };
        }

        let left = if other.start > self.start {
            Some(LineRange::new(self.start, other.start))
        } else {
            None
        };
        let right = if other.end < self.end {
            Some(LineRange::new(other.end, self.end))
        } else {
            None
        };
        (left, right)
    }

    pub fn rows(&self) -> std::ops::Range<StableRow> {
        self.start..self.end
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl From<std::ops::Range<StableRow>> for LineRange {
    fn from(r: std::ops::Range<StableRow>) -> Self {
        LineRange::new(r.start, r.end)
    }
}

/// Sort ranges and collapse overlapping or adjacent ones
///
/// The result is ordered, non-overlapping and free of empty ranges.
pub fn merge_ranges<I>(ranges: I) -> Vec<LineRange>
where
    I: IntoIterator<Item = LineRange>,
{
    let mut sorted: Vec<LineRange> = ranges.into_iter().filter(|r| !r.is_empty()).collect();
    sorted.sort_by_key(|r| (r.start, r.end));

    let mut merged: Vec<LineRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if last.touches(&range) => {
                last.end = max(last.end, range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Collapse individual rows into ranges
pub fn rows_to_ranges<I>(rows: I) -> Vec<LineRange>
where
    I: IntoIterator<Item = StableRow>,
{
    merge_ranges(rows.into_iter().map(|row| LineRange::new(row, row + 1)))
}

/// Total number of rows covered by a set of ranges; None on overflow
pub fn total_rows(ranges: &[LineRange]) -> Option<u64> {
    ranges
        .iter()
        .try_fold(0u64, |total, range| total.checked_add(range.len()))
}

/// Content for one requested range, one string per row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeContent {
    pub range: LineRange,
    pub lines: Vec<String>,
}

impl RangeContent {
    /// Iterate `(row, text)` pairs
    pub fn rows(&self) -> impl Iterator<Item = (StableRow, &str)> + '_ {
        self.range.rows().zip(self.lines.iter().map(String::as_str))
    }

    /// A well-formed range carries exactly one line per row
    pub fn is_complete(&self) -> bool {
        self.lines.len() as u64 == self.range.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_ordering() {
        let g = Generation::INITIAL;
        assert!(g.next() > g);
        assert_eq!(g.next().next().value(), 2);
        assert_eq!(Generation(4).to_string(), "g4");
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let r = LineRange::new(10, 5);
        assert!(r.is_empty());
        assert_eq!(r.len(), 0);
    }

    #[test]
    fn test_subtract_middle() {
        let r = LineRange::new(0, 50);
        let (a, b) = r.subtract(&LineRange::new(10, 20));
        assert_eq!(a, Some(LineRange::new(0, 10)));
        assert_eq!(b, Some(LineRange::new(20, 50)));
    }

    #[test]
    fn test_subtract_covering() {
        let r = LineRange::new(26, 50);
        assert_eq!(r.subtract(&LineRange::new(0, 100)), (None, None));
    }

    #[test]
    fn test_subtract_disjoint() {
        let r = LineRange::new(0, 10);
        assert_eq!(
            r.subtract(&LineRange::new(20, 30)),
            (Some(LineRange::new(0, 10)), None)
        );
    }

    #[test]
    fn test_merge_overlapping_and_adjacent() {
        let merged = merge_ranges(vec![
            LineRange::new(30, 40),
            LineRange::new(0, 10),
            LineRange::new(10, 12),
            LineRange::new(5, 8),
            LineRange::new(35, 45),
            LineRange::new(60, 60),
        ]);
        assert_eq!(merged, vec![LineRange::new(0, 12), LineRange::new(30, 45)]);
    }

    #[test]
    fn test_rows_to_ranges() {
        let ranges = rows_to_ranges(vec![7, 3, 4, 5, 9, 8]);
        assert_eq!(ranges, vec![LineRange::new(3, 6), LineRange::new(7, 10)]);
        assert_eq!(total_rows(&ranges), Some(6));
    }

    #[test]
    fn test_total_rows_overflow() {
        let huge = [LineRange::new(0, u64::MAX), LineRange::new(0, u64::MAX)];
        assert_eq!(total_rows(&huge), None);
        assert_eq!(total_rows(&huge[..1]), Some(u64::MAX));
    }

    #[test]
    fn test_range_content_rows() {
        let content = RangeContent {
            range: LineRange::new(4, 6),
            lines: vec!["a".into(), "b".into()],
        };
        assert!(content.is_complete());
        let rows: Vec<_> = content.rows().collect();
        assert_eq!(rows, vec![(4, "a"), (5, "b")]);
    }
}
