//! Page-range slicing: split a requested page range into bounded chunks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open range of 0-based page indices `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Build a range from 1-indexed inclusive page numbers, as typed by users.
    pub fn from_one_based(first: usize, last: usize) -> Self {
        Self {
            start: first.saturating_sub(1),
            end: last,
        }
    }

    /// The whole document.
    pub fn full(total_pages: usize) -> Self {
        Self {
            start: 0,
            end: total_pages,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, page: usize) -> bool {
        page >= self.start && page < self.end
    }

    /// Human label, 1-indexed inclusive: `Pages 4-6` or `Page 10`.
    pub fn label(&self) -> String {
        if self.len() == 1 {
            format!("Page {}", self.start + 1)
        } else {
            format!("Pages {}-{}", self.start + 1, self.end)
        }
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len() == 1 {
            write!(f, "page {}", self.start + 1)
        } else {
            write!(f, "pages {}-{}", self.start + 1, self.end)
        }
    }
}

/// Split `range` into contiguous chunks of at most `chunk_size` pages.
///
/// The chunks tile the range exactly, in ascending order. Inputs outside the
/// contract are clamped: `chunk_size` to at least 1 and `range.end` to
/// `total_pages`. An empty range yields no chunks.
pub fn slice(total_pages: usize, range: PageRange, chunk_size: usize) -> Vec<PageRange> {
    let chunk_size = chunk_size.max(1);
    let end = range.end.min(total_pages);
    if range.start >= end {
        return Vec::new();
    }

    (range.start..end)
        .step_by(chunk_size)
        .map(|start| PageRange::new(start, (start + chunk_size).min(end)))
        .collect()
}
