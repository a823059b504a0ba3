//! Block number type.

use std::fmt;

/// Number of a block in the swap file.
///
/// Positive numbers are page indices in the swap file. Block 0 holds the
/// swap file identity and block 1 is always the root pointer block.
/// Negative numbers are virtual: the block has never been written and its
/// text may still be available, unmodified, in the original file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockNr(pub i64);

impl BlockNr {
    /// Block 0, the swap file identity
    pub const ZERO: BlockNr = BlockNr(0);

    /// Block 1, the root pointer block
    pub const ROOT: BlockNr = BlockNr(1);

    /// Block 2, the first data block of a fresh memline
    pub const FIRST_DATA: BlockNr = BlockNr(2);

    /// Create a new block number
    pub const fn new(nr: i64) -> Self {
        Self(nr)
    }

    /// Get the raw block number
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Check whether this is a virtual, never written block number
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Check whether this is the root pointer block
    pub const fn is_root(self) -> bool {
        self.0 == Self::ROOT.0
    }

    /// Calculate the byte offset of this block in the swap file
    pub const fn file_offset(self, page_size: usize) -> u64 {
        self.0 as u64 * page_size as u64
    }
}

impl fmt::Display for BlockNr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for BlockNr {
    fn from(nr: i64) -> Self {
        Self(nr)
    }
}

impl From<BlockNr> for i64 {
    fn from(nr: BlockNr) -> Self {
        nr.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PAGE_SIZE;

    #[test]
    fn test_block_nr_basics() {
        let nr = BlockNr::new(42);
        assert_eq!(nr.value(), 42);
        assert!(!nr.is_negative());
        assert!(BlockNr::new(-3).is_negative());
        assert!(BlockNr::ROOT.is_root());
    }

    #[test]
    fn test_block_nr_file_offset() {
        assert_eq!(BlockNr::new(3).file_offset(PAGE_SIZE), 3 * PAGE_SIZE as u64);
        assert_eq!(BlockNr::ZERO.file_offset(PAGE_SIZE), 0);
    }

    #[test]
    fn test_block_nr_display() {
        assert_eq!(format!("{}", BlockNr::new(-7)), "-7");
    }
}
