//! Pointer blocks: the branch nodes of the line tree.
//!
//! Layout:
//! ```text
//! ┌──────────┬──────────┬──────────────┬─────┐
//! │ id "pt"  │ count    │ count_max    │ pad │   8 bytes
//! ├──────────┴──────────┴──────────────┴─────┤
//! │ entry 0: bnum │ line_count │ old_lnum │ page_count │  4 x i32
//! │ entry 1 ...                               │
//! │ entry count_max-1                         │
//! └───────────────────────────────────────────┘
//! ```
//! The line counts of the entries add up to the number of lines in the
//! subtree below the block.

use crate::block::BlockBuf;
use crate::store::BlockHeader;
use crate::types::{BlockNr, LineNr, PTR_ID};

/// Size of the pointer block header
pub const POINTER_HEADER_SIZE: usize = 8;

/// Size of one pointer entry
pub const POINTER_ENTRY_SIZE: usize = 16;

const OFF_COUNT: usize = 2;
const OFF_COUNT_MAX: usize = 4;

/// One child reference in a pointer block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PointerEntry {
    /// Block number of the child; negative when never written
    pub bnum: BlockNr,
    /// Number of lines in the child's subtree
    pub line_count: LineNr,
    /// Line number of the child's first line in the original file, 0 if unknown
    pub old_lnum: LineNr,
    /// Number of pages occupied by the child
    pub page_count: usize,
}

/// A pointer block with typed access to its entries
#[derive(Debug)]
pub struct PointerBlock {
    header: BlockHeader,
}

impl PointerBlock {
    /// Format a freshly allocated block as an empty pointer block
    pub fn init(mut header: BlockHeader) -> Self {
        let data = header.data_mut();
        let count_max = ((data.len() - POINTER_HEADER_SIZE) / POINTER_ENTRY_SIZE).min(u16::MAX as usize);
        data.fill(0);
        data.set_u16(0, PTR_ID);
        data.set_u16(OFF_COUNT, 0);
        data.set_u16(OFF_COUNT_MAX, count_max as u16);
        Self { header }
    }

    pub(crate) fn from_header(header: BlockHeader) -> Self {
        Self { header }
    }

    /// Check that the header describes entries that fit the block
    pub(crate) fn is_valid(data: &BlockBuf) -> bool {
        if data.len() < POINTER_HEADER_SIZE {
            return false;
        }
        let count = data.u16_at(OFF_COUNT) as usize;
        let count_max = data.u16_at(OFF_COUNT_MAX) as usize;
        count <= count_max && POINTER_HEADER_SIZE + count_max * POINTER_ENTRY_SIZE <= data.len()
    }

    /// Block number of this block
    pub fn nr(&self) -> BlockNr {
        self.header.nr()
    }

    /// Number of entries in use
    pub fn count(&self) -> usize {
        self.header.data().u16_at(OFF_COUNT) as usize
    }

    /// Maximum number of entries
    pub fn count_max(&self) -> usize {
        self.header.data().u16_at(OFF_COUNT_MAX) as usize
    }

    /// True when no further entry can be inserted
    pub fn is_full(&self) -> bool {
        self.count() >= self.count_max()
    }

    pub(crate) fn set_count(&mut self, count: usize) {
        debug_assert!(count <= self.count_max());
        self.header.data_mut().set_u16(OFF_COUNT, count as u16);
    }

    fn entry_offset(index: usize) -> usize {
        POINTER_HEADER_SIZE + index * POINTER_ENTRY_SIZE
    }

    /// Read entry `index`
    pub fn entry(&self, index: usize) -> PointerEntry {
        let data = self.header.data();
        let at = Self::entry_offset(index);
        PointerEntry {
            bnum: BlockNr::new(data.i32_at(at) as i64),
            line_count: data.i32_at(at + 4).max(0) as LineNr,
            old_lnum: data.i32_at(at + 8).max(0) as LineNr,
            page_count: data.i32_at(at + 12).max(1) as usize,
        }
    }

    /// Overwrite entry `index`
    pub fn set_entry(&mut self, index: usize, entry: PointerEntry) {
        let data = self.header.data_mut();
        let at = Self::entry_offset(index);
        data.set_i32(at, entry.bnum.value() as i32);
        data.set_i32(at + 4, entry.line_count as i32);
        data.set_i32(at + 8, entry.old_lnum as i32);
        data.set_i32(at + 12, entry.page_count as i32);
    }

    /// All entries in use
    pub fn entries(&self) -> Vec<PointerEntry> {
        (0..self.count()).map(|i| self.entry(i)).collect()
    }

    /// Sum of the line counts of all entries
    pub fn total_lines(&self) -> LineNr {
        (0..self.count()).map(|i| self.entry(i).line_count).sum()
    }

    /// Add `delta` to the line count of entry `index`
    pub fn adjust_line_count(&mut self, index: usize, delta: isize) {
        let mut entry = self.entry(index);
        entry.line_count = entry.line_count.saturating_add_signed(delta);
        self.set_entry(index, entry);
    }

    /// Insert `entry` at `index`, shifting later entries right
    pub fn insert_entry(&mut self, index: usize, entry: PointerEntry) {
        let count = self.count();
        debug_assert!(count < self.count_max() && index <= count);
        let from = Self::entry_offset(index);
        let to = Self::entry_offset(count);
        self.header
            .data_mut()
            .copy_within(from..to, from + POINTER_ENTRY_SIZE);
        self.set_count(count + 1);
        self.set_entry(index, entry);
    }

    /// Remove entry `index`, shifting later entries left
    pub fn remove_entry(&mut self, index: usize) {
        let count = self.count();
        debug_assert!(index < count);
        let from = Self::entry_offset(index + 1);
        let to = Self::entry_offset(count);
        self.header
            .data_mut()
            .copy_within(from..to, from - POINTER_ENTRY_SIZE);
        self.set_count(count - 1);
    }

    /// Copy entries `from..count` to the start of `dest`, which gets
    /// exactly those entries. The own count is left for the caller to set.
    pub fn copy_tail_to(&self, from: usize, dest: &mut PointerBlock) -> usize {
        let moved = self.count().saturating_sub(from);
        let src = &self.header.data()[Self::entry_offset(from)..Self::entry_offset(from + moved)];
        let at = Self::entry_offset(0);
        dest.header.data_mut()[at..at + src.len()].copy_from_slice(src);
        dest.set_count(moved);
        moved
    }

    /// Get the raw header
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    /// Give the raw header back
    pub fn into_header(self) -> BlockHeader {
        self.header
    }
}

/// The root pointer block. It is always block 1 and never moves, so it
/// grows by pushing its contents one level down.
#[derive(Debug)]
pub struct RootPointerBlock(PointerBlock);

impl RootPointerBlock {
    /// Move all entries into `child` and leave the root with a single
    /// entry covering all `line_count` lines, one level higher up.
    pub fn deepen(mut self, mut child: PointerBlock, line_count: LineNr) -> (RootPointerBlock, PointerBlock) {
        self.0.copy_tail_to(0, &mut child);
        self.0.set_count(1);
        self.0.set_entry(
            0,
            PointerEntry {
                bnum: child.nr(),
                line_count,
                old_lnum: 1,
                page_count: 1,
            },
        );
        (self, child)
    }

    /// Give the raw header back
    pub fn into_header(self) -> BlockHeader {
        self.0.into_header()
    }

    /// Plain pointer block access for entry edits that keep the root non-empty
    pub fn into_inner(self) -> PointerBlock {
        self.0
    }
}

impl std::ops::Deref for RootPointerBlock {
    type Target = PointerBlock;

    fn deref(&self) -> &PointerBlock {
        &self.0
    }
}

/// A pointer block classified by its position in the tree
#[derive(Debug)]
pub enum PointerNode {
    /// Block 1
    Root(RootPointerBlock),
    /// Any other pointer block
    Branch(PointerBlock),
}

impl PointerNode {
    /// Classify by block number
    pub fn classify(block: PointerBlock) -> Self {
        if block.nr().is_root() {
            PointerNode::Root(RootPointerBlock(block))
        } else {
            PointerNode::Branch(block)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PAGE_SIZE;

    fn block(nr: i64) -> PointerBlock {
        PointerBlock::init(BlockHeader::new(BlockNr::new(nr), 1, BlockBuf::zeroed(PAGE_SIZE)))
    }

    fn entry(bnum: i64, line_count: LineNr) -> PointerEntry {
        PointerEntry {
            bnum: BlockNr::new(bnum),
            line_count,
            old_lnum: 0,
            page_count: 1,
        }
    }

    #[test]
    fn test_count_max_from_page_size() {
        let pb = block(3);
        assert_eq!(pb.count_max(), (PAGE_SIZE - POINTER_HEADER_SIZE) / POINTER_ENTRY_SIZE);
        assert_eq!(pb.count(), 0);
        assert!(!pb.is_full());
    }

    #[test]
    fn test_insert_remove_entries() {
        let mut pb = block(3);
        pb.insert_entry(0, entry(10, 5));
        pb.insert_entry(1, entry(11, 7));
        pb.insert_entry(1, entry(-2, 1));

        let bnums: Vec<i64> = pb.entries().iter().map(|e| e.bnum.value()).collect();
        assert_eq!(bnums, vec![10, -2, 11]);
        assert_eq!(pb.total_lines(), 13);

        pb.remove_entry(0);
        assert_eq!(pb.count(), 2);
        assert_eq!(pb.entry(0).bnum, BlockNr::new(-2));

        pb.adjust_line_count(1, -3);
        assert_eq!(pb.entry(1).line_count, 4);
    }

    #[test]
    fn test_root_deepen() {
        let mut root = block(1);
        for i in 0..root.count_max() {
            root.insert_entry(i, entry(100 + i as i64, 2));
        }
        let total = root.total_lines();

        let PointerNode::Root(root) = PointerNode::classify(root) else {
            panic!("block 1 must classify as root");
        };
        let (root, child) = root.deepen(block(7), total);

        assert_eq!(root.count(), 1);
        assert_eq!(root.entry(0).bnum, BlockNr::new(7));
        assert_eq!(root.entry(0).line_count, total);
        assert_eq!(child.count(), child.count_max());
        assert_eq!(child.total_lines(), total);
        assert!(matches!(PointerNode::classify(child), PointerNode::Branch(_)));
    }
}
