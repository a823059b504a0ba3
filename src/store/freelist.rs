//! Free list management.
//!
//! Tracks runs of freed swap file pages that can be reused for new
//! blocks. A block of several pages needs a run at least that long; the
//! rest of a longer run stays on the list.

use crate::types::BlockNr;

/// A run of free pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeRun {
    nr: BlockNr,
    page_count: usize,
}

/// Manages free page runs for reuse
#[derive(Debug, Default)]
pub struct FreeList {
    runs: Vec<FreeRun>,
}

impl FreeList {
    /// Create a new empty free list
    pub fn new() -> Self {
        Self { runs: Vec::new() }
    }

    /// Add a run of pages to the free list
    pub fn push(&mut self, nr: BlockNr, page_count: usize) {
        self.runs.push(FreeRun { nr, page_count });
    }

    /// Take the first run with at least `page_count` pages.
    ///
    /// An exact fit is removed; a longer run gives up its first pages.
    pub fn take(&mut self, page_count: usize) -> Option<BlockNr> {
        let pos = self.runs.iter().position(|r| r.page_count >= page_count)?;
        let run = self.runs[pos];
        if run.page_count == page_count {
            self.runs.remove(pos);
        } else {
            self.runs[pos] = FreeRun {
                nr: BlockNr::new(run.nr.value() + page_count as i64),
                page_count: run.page_count - page_count,
            };
        }
        Some(run.nr)
    }

    /// Get the number of free runs
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Check if the free list is empty
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Total number of free pages
    #[cfg(test)]
    pub fn page_count(&self) -> usize {
        self.runs.iter().map(|r| r.page_count).sum()
    }
}
