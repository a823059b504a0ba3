//! Block store: paged block cache over a swap file.
//!
//! The memline consumes blocks through the [`BlockStore`] trait. A block
//! checked out with `get` or `new_block` is owned by its [`BlockHeader`]
//! until it is handed back with `put` or `free`; the store refuses a
//! second checkout of the same block in the meantime.

mod freelist;
mod lru;
mod memfile;

pub use freelist::FreeList;
pub use lru::LruCache;
pub use memfile::MemFile;

use crate::block::BlockBuf;
use crate::error::Result;
use crate::types::BlockNr;
use std::path::Path;

/// A block checked out of the store
#[derive(Debug)]
pub struct BlockHeader {
    nr: BlockNr,
    page_count: usize,
    data: BlockBuf,
}

impl BlockHeader {
    /// Wrap block data
    pub fn new(nr: BlockNr, page_count: usize, data: BlockBuf) -> Self {
        Self {
            nr,
            page_count,
            data,
        }
    }

    /// Block number
    pub fn nr(&self) -> BlockNr {
        self.nr
    }

    /// Number of pages
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Block contents
    pub fn data(&self) -> &BlockBuf {
        &self.data
    }

    /// Mutable block contents
    pub fn data_mut(&mut self) -> &mut BlockBuf {
        &mut self.data
    }

    pub(crate) fn into_parts(self) -> (BlockNr, usize, BlockBuf) {
        (self.nr, self.page_count, self.data)
    }
}

/// Options for [`BlockStore::sync`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncFlags {
    /// Also write blocks that still have a negative number
    pub all: bool,
    /// Stop early when the interrupt flag is raised
    pub check_interrupt: bool,
    /// Flush the file to stable storage afterwards
    pub fsync: bool,
}

/// Trait for the paged block cache underneath a memline
///
/// This abstraction allows swapping the storage backend or injecting
/// failures in tests.
pub trait BlockStore: Send {
    /// Page size in bytes
    fn page_size(&self) -> usize;

    /// Allocate a zeroed block of `page_count` pages.
    ///
    /// Negative blocks get a virtual number until they are first written.
    fn new_block(&mut self, negative: bool, page_count: usize) -> Result<BlockHeader>;

    /// Check out an existing block
    fn get(&mut self, nr: BlockNr, page_count: usize) -> Result<BlockHeader>;

    /// Return a checked-out block.
    ///
    /// `update_position` gives a negative block its final number now,
    /// because its contents no longer match the original file.
    fn put(&mut self, header: BlockHeader, dirty: bool, update_position: bool);

    /// Release a checked-out block for reuse
    fn free(&mut self, header: BlockHeader);

    /// Write dirty blocks to the swap file
    fn sync(&mut self, flags: SyncFlags) -> Result<()>;

    /// Translate a negative block number that has since been written.
    ///
    /// Returns `nr` unchanged when there is nothing to translate.
    fn translate(&mut self, nr: BlockNr) -> BlockNr;

    /// True while pointer entries may still hold stale negative numbers
    fn needs_translation(&self) -> bool;

    /// True when blocks are waiting to be written
    fn is_dirty(&self) -> bool;

    /// Number of blocks currently checked out
    fn locked_count(&self) -> usize;

    /// Path of the swap file, `None` for a memory-only store
    fn path(&self) -> Option<&Path>;

    /// Close the store, optionally removing the swap file
    fn close(self: Box<Self>, delete_file: bool) -> Result<()>;
}
