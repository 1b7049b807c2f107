//! Client-side line cache
//!
//! Holds the content the renderer paints from, keyed by stable row and
//! tagged with the generation it arrived with.

use std::collections::BTreeMap;

use reflow_protocol::{Generation, LineRange, RangeContent, StableRow};

/// One cached row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedLine {
    pub text: String,
    pub generation: Generation,
}

/// Lookup counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct RenderCache {
    lines: BTreeMap<StableRow, CachedLine>,
    stats: CacheStats,
}

impl RenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a row for painting, counting hits and misses
    pub fn get(&mut self, row: StableRow) -> Option<&CachedLine> {
        match self.lines.get(&row) {
            Some(line) => {
                self.stats.hits += 1;
                Some(line)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Look up a row without touching the counters
    pub fn peek(&self, row: StableRow) -> Option<&CachedLine> {
        self.lines.get(&row)
    }

    /// Store fetched content, returning the number of rows written
    pub fn apply(&mut self, generation: Generation, content: &RangeContent) -> usize {
        let mut written = 0;
        for (row, text) in content.rows() {
            self.lines.insert(
                row,
                CachedLine {
                    text: text.to_string(),
                    generation,
                },
            );
            written += 1;
        }
        written
    }

    /// Drop every row in `range`, returning how many were cached
    pub fn invalidate(&mut self, range: &LineRange) -> usize {
        let doomed: Vec<StableRow> = self
            .lines
            .range(range.start..range.end)
            .map(|(row, _)| *row)
            .collect();
        for row in &doomed {
            self.lines.remove(row);
        }
        doomed.len()
    }

    /// Drop rows at or past `total_lines`
    pub fn truncate(&mut self, total_lines: u64) {
        self.lines.split_off(&total_lines);
    }

    /// Rows of `range` that have no cached content
    pub fn missing(&self, range: &LineRange) -> Vec<StableRow> {
        range
            .rows()
            .filter(|row| !self.lines.contains_key(row))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StableRow, &CachedLine)> + '_ {
        self.lines.iter().map(|(row, line)| (*row, line))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(start: u64, texts: &[&str]) -> RangeContent {
        RangeContent {
            range: LineRange::new(start, start + texts.len() as u64),
            lines: texts.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_apply_and_get() {
        let mut cache = RenderCache::new();
        assert_eq!(cache.apply(Generation(2), &content(10, &["a", "b"])), 2);

        let line = cache.get(11).cloned();
        assert_eq!(
            line,
            Some(CachedLine {
                text: "b".into(),
                generation: Generation(2),
            })
        );
        assert!(cache.get(12).is_none());
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
        assert_eq!(cache.stats().hit_rate(), 0.5);
    }

    #[test]
    fn test_newer_apply_overwrites() {
        let mut cache = RenderCache::new();
        cache.apply(Generation(1), &content(0, &["old", "old"]));
        cache.apply(Generation(2), &content(1, &["new"]));

        assert_eq!(cache.peek(0).map(|l| l.generation), Some(Generation(1)));
        assert_eq!(cache.peek(1).map(|l| l.text.as_str()), Some("new"));
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_invalidate_range() {
        let mut cache = RenderCache::new();
        cache.apply(Generation(1), &content(0, &["a", "b", "c", "d"]));

        assert_eq!(cache.invalidate(&LineRange::new(1, 3)), 2);
        let rows: Vec<u64> = cache.iter().map(|(row, _)| row).collect();
        assert_eq!(rows, vec![0, 3]);
        assert_eq!(cache.missing(&LineRange::new(0, 5)), vec![1, 2, 4]);
    }

    #[test]
    fn test_truncate() {
        let mut cache = RenderCache::new();
        cache.apply(Generation(1), &content(0, &["a", "b", "c"]));
        cache.truncate(1);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
