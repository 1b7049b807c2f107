//! Scrollback buffer
//!
//! A bounded ring of lines addressed by stable row index. Row numbers keep
//! counting up as old lines are evicted, so a row a client cached earlier
//! never silently points at different content.

use std::collections::VecDeque;

use reflow_protocol::{LineRange, StableRow};

/// Bounded line history of a pane
#[derive(Debug, Clone)]
pub struct ScrollbackBuffer {
    lines: VecDeque<String>,
    max_lines: usize,
    /// Stable row index of `lines[0]`
    first_row: StableRow,
    /// Total bytes currently stored
    total_bytes: usize,
}

impl ScrollbackBuffer {
    /// Create a new scrollback buffer with the given capacity
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(max_lines.min(1024)),
            max_lines: max_lines.max(1),
            first_row: 0,
            total_bytes: 0,
        }
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    /// Lines currently retained
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Oldest row still retained
    pub fn first_row(&self) -> StableRow {
        self.first_row
    }

    /// One past the newest row ever written
    pub fn total_lines(&self) -> u64 {
        self.first_row + self.lines.len() as u64
    }

    /// Append a line, evicting the oldest at capacity
    pub fn push_line(&mut self, line: String) {
        if self.lines.len() >= self.max_lines {
            if let Some(removed) = self.lines.pop_front() {
                self.total_bytes = self.total_bytes.saturating_sub(removed.len());
                self.first_row += 1;
            }
        }
        self.total_bytes += line.len();
        self.lines.push_back(line);
    }

    pub fn push_lines<I>(&mut self, lines: I)
    where
        I: IntoIterator<Item = String>,
    {
        for line in lines {
            self.push_line(line);
        }
    }

    /// Line at a stable row, if still retained
    pub fn line(&self, row: StableRow) -> Option<&str> {
        let index = row.checked_sub(self.first_row)?;
        self.lines.get(usize::try_from(index).ok()?).map(String::as_str)
    }

    /// Content for every row of `range`
    ///
    /// Rows that were evicted or not written yet come back empty, so the
    /// result always holds exactly `range.len()` lines.
    pub fn read_range(&self, range: &LineRange) -> Vec<String> {
        range
            .rows()
            .map(|row| self.line(row).map(str::to_owned).unwrap_or_default())
            .collect()
    }

    pub fn clear(&mut self) {
        self.first_row = self.total_lines();
        self.lines.clear();
        self.total_bytes = 0;
    }
}

impl Default for ScrollbackBuffer {
    fn default() -> Self {
        Self::new(10_000)
    }
}
