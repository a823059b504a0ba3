//! File-backed block store.
//!
//! `MemFile` keeps blocks in memory and writes them to the swap file on
//! sync or when too many unlocked blocks are cached. Without a file it is
//! a plain in-memory block store.
//!
//! Data blocks holding text that is still available in the original file
//! are created with negative numbers and only get a position in the swap
//! file when they are written. The store remembers that translation until
//! the pointer entry referencing the block asks for it.

use crate::block::BlockBuf;
use crate::error::{MemlineError, Result};
use crate::store::{BlockHeader, BlockStore, FreeList, LruCache, SyncFlags};
use crate::types::{valid_page_size, BlockNr, DEFAULT_CACHE_BLOCKS};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// An unlocked block held in memory
struct CachedBlock {
    data: BlockBuf,
    page_count: usize,
    dirty: bool,
}

/// Paged block cache over an optional swap file
pub struct MemFile {
    /// The swap file, `None` for memory-only
    file: Option<File>,
    path: Option<PathBuf>,
    page_size: usize,
    /// Unlocked blocks in memory
    cache: HashMap<BlockNr, CachedBlock>,
    /// Checked-out blocks and whether they were dirty when checked out
    locked: HashMap<BlockNr, bool>,
    lru: LruCache,
    free_list: FreeList,
    /// Negative numbers that have been given a position in the file
    trans: HashMap<BlockNr, BlockNr>,
    /// Next unused positive block number
    blocknr_max: i64,
    /// Next unused negative block number
    blocknr_min: i64,
    /// Negative numbers that may still be referenced by pointer entries
    neg_count: usize,
    cache_blocks: usize,
    interrupt: Option<Arc<AtomicBool>>,
}

impl MemFile {
    fn with_file(file: Option<File>, path: Option<PathBuf>, page_size: usize) -> Self {
        Self {
            file,
            path,
            page_size,
            cache: HashMap::new(),
            locked: HashMap::new(),
            lru: LruCache::new(DEFAULT_CACHE_BLOCKS),
            free_list: FreeList::new(),
            trans: HashMap::new(),
            blocknr_max: 0,
            blocknr_min: -1,
            neg_count: 0,
            cache_blocks: DEFAULT_CACHE_BLOCKS,
            interrupt: None,
        }
    }

    /// Create a memory-only store
    pub fn memory(page_size: usize) -> Result<Self> {
        check_page_size(page_size)?;
        Ok(Self::with_file(None, None, page_size))
    }

    /// Create a new swap file; fails if the file already exists
    pub fn create(path: &Path, page_size: usize) -> Result<Self> {
        check_page_size(page_size)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        debug!(path = %path.display(), page_size, "created swap file");
        Ok(Self::with_file(Some(file), Some(path.to_path_buf()), page_size))
    }

    /// Open an existing swap file read-only, e.g. for recovery
    pub fn open_existing(path: &Path, page_size: usize) -> Result<Self> {
        check_page_size(page_size)?;
        let file = File::open(path)?;
        let mut mf = Self::with_file(Some(file), Some(path.to_path_buf()), page_size);
        mf.blocknr_max = mf.pages_in_file()?;
        Ok(mf)
    }

    /// Set the number of unlocked blocks kept in memory
    pub fn with_cache_blocks(mut self, cache_blocks: usize) -> Self {
        self.cache_blocks = cache_blocks.max(1);
        self
    }

    /// Flag polled by `sync` when `check_interrupt` is set
    pub fn set_interrupt(&mut self, flag: Option<Arc<AtomicBool>>) {
        self.interrupt = flag;
    }

    /// Change the page size of an existing file and recompute its block range.
    ///
    /// Clean cached blocks are dropped since they were read with the old size.
    pub fn set_page_size(&mut self, page_size: usize) -> Result<()> {
        check_page_size(page_size)?;
        self.page_size = page_size;
        self.cache.retain(|_, c| c.dirty);
        self.lru = LruCache::new(self.cache_blocks);
        for nr in self.cache.keys() {
            self.lru.touch(*nr);
        }
        self.blocknr_max = self.pages_in_file()?;
        Ok(())
    }

    /// Number of whole or partial pages in the file
    fn pages_in_file(&self) -> Result<i64> {
        match &self.file {
            Some(file) => {
                let len = file.metadata()?.len();
                Ok(len.div_ceil(self.page_size as u64) as i64)
            }
            None => Ok(0),
        }
    }

    /// Number of unlocked blocks held in memory
    #[cfg(test)]
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    /// Allocate a positive number for a block of `page_count` pages
    fn alloc_positive(&mut self, page_count: usize) -> Result<BlockNr> {
        if let Some(nr) = self.free_list.take(page_count) {
            return Ok(nr);
        }
        let nr = self.blocknr_max;
        let end = nr + page_count as i64;
        if end > i32::MAX as i64 {
            return Err(MemlineError::OutOfBlocks);
        }
        self.blocknr_max = end;
        Ok(BlockNr::new(nr))
    }

    /// Give a negative block a position in the file and remember the translation
    fn assign_position(&mut self, nr: BlockNr, page_count: usize) -> Result<BlockNr> {
        let pos = self.alloc_positive(page_count)?;
        self.trans.insert(nr, pos);
        debug!(from = %nr, to = %pos, "block gets a position in the swap file");
        Ok(pos)
    }

    fn read_block(&mut self, nr: BlockNr, page_count: usize) -> Result<BlockBuf> {
        let page_size = self.page_size;
        let Some(file) = self.file.as_mut() else {
            return Err(MemlineError::BlockNotFound(nr));
        };
        let mut buf = BlockBuf::zeroed(page_count * page_size);
        file.seek(SeekFrom::Start(nr.file_offset(page_size)))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf.as_bytes_mut()[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        // block 0 may be read with a guessed page size larger than the file
        if filled < buf.len() && !(nr == BlockNr::ZERO && filled > 0) {
            return Err(MemlineError::BlockNotFound(nr));
        }
        Ok(buf)
    }

    /// Write the cached block `nr`, giving it a position first if it is
    /// negative. Returns the number it was written under.
    fn write_cached(&mut self, nr: BlockNr) -> Result<BlockNr> {
        let nr = if nr.is_negative() {
            let page_count = match self.cache.get(&nr) {
                Some(cached) => cached.page_count,
                None => return Err(MemlineError::BlockNotFound(nr)),
            };
            let pos = self.assign_position(nr, page_count)?;
            if let Some(cached) = self.cache.remove(&nr) {
                self.cache.insert(pos, cached);
            }
            self.lru.remove(nr);
            self.lru.touch(pos);
            pos
        } else {
            nr
        };

        let page_size = self.page_size;
        let (Some(file), Some(cached)) = (self.file.as_mut(), self.cache.get_mut(&nr)) else {
            return Err(MemlineError::BlockNotFound(nr));
        };
        file.seek(SeekFrom::Start(nr.file_offset(page_size)))?;
        file.write_all(cached.data.as_bytes())?;
        cached.dirty = false;
        Ok(nr)
    }

    /// Drop the least recently used unlocked blocks beyond the cache size,
    /// writing dirty ones first. Memory-only stores keep everything.
    fn evict(&mut self) {
        if self.file.is_none() {
            return;
        }
        while self.cache.len() > self.cache_blocks {
            let Some(mut nr) = self.lru.oldest() else {
                break;
            };
            if self.cache.get(&nr).map_or(false, |c| c.dirty) {
                match self.write_cached(nr) {
                    Ok(written) => nr = written,
                    Err(e) => {
                        warn!(block = %nr, error = %e, "cannot write block, keeping it in memory");
                        break;
                    }
                }
            }
            self.lru.remove(nr);
            self.cache.remove(&nr);
        }
    }
}

fn check_page_size(page_size: usize) -> Result<()> {
    if valid_page_size(page_size) {
        Ok(())
    } else {
        Err(MemlineError::UnsupportedPageSize(page_size))
    }
}

impl BlockStore for MemFile {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn new_block(&mut self, negative: bool, page_count: usize) -> Result<BlockHeader> {
        let nr = if negative {
            if self.blocknr_min <= i32::MIN as i64 {
                return Err(MemlineError::OutOfBlocks);
            }
            let nr = BlockNr::new(self.blocknr_min);
            self.blocknr_min -= 1;
            self.neg_count += 1;
            nr
        } else {
            self.alloc_positive(page_count)?
        };
        self.locked.insert(nr, true);
        Ok(BlockHeader::new(
            nr,
            page_count,
            BlockBuf::zeroed(page_count * self.page_size),
        ))
    }

    fn get(&mut self, nr: BlockNr, page_count: usize) -> Result<BlockHeader> {
        let nr = match self.trans.get(&nr) {
            Some(&pos) => pos,
            None => nr,
        };
        if self.locked.contains_key(&nr) {
            return Err(MemlineError::BlockLocked(nr));
        }
        if let Some(cached) = self.cache.remove(&nr) {
            self.lru.remove(nr);
            self.locked.insert(nr, cached.dirty);
            return Ok(BlockHeader::new(nr, cached.page_count, cached.data));
        }
        // a page count from a damaged pointer entry must not reach past the file
        let end = (page_count as i64).checked_add(nr.value());
        if nr.is_negative() || page_count == 0 || end.map_or(true, |end| end > self.blocknr_max) {
            return Err(MemlineError::BlockNotFound(nr));
        }
        let data = self.read_block(nr, page_count)?;
        self.locked.insert(nr, false);
        Ok(BlockHeader::new(nr, page_count, data))
    }

    fn put(&mut self, header: BlockHeader, dirty: bool, update_position: bool) {
        let (mut nr, page_count, data) = header.into_parts();
        let dirty = self.locked.remove(&nr).unwrap_or(false) || dirty;

        if update_position && nr.is_negative() && self.file.is_some() {
            match self.assign_position(nr, page_count) {
                Ok(pos) => nr = pos,
                Err(e) => warn!(block = %nr, error = %e, "cannot give block a position"),
            }
        }

        self.cache.insert(
            nr,
            CachedBlock {
                data,
                page_count,
                dirty: dirty || (update_position && !nr.is_negative()),
            },
        );
        self.lru.touch(nr);
        self.evict();
    }

    fn free(&mut self, header: BlockHeader) {
        let (nr, page_count, _) = header.into_parts();
        self.locked.remove(&nr);
        if nr.is_negative() {
            self.neg_count = self.neg_count.saturating_sub(1);
        } else {
            let stale: Vec<BlockNr> = self
                .trans
                .iter()
                .filter(|(_, &pos)| pos == nr)
                .map(|(&neg, _)| neg)
                .collect();
            for neg in stale {
                self.trans.remove(&neg);
                self.neg_count = self.neg_count.saturating_sub(1);
            }
            self.free_list.push(nr, page_count);
        }
        debug!(block = %nr, page_count, "freed block");
    }

    fn sync(&mut self, flags: SyncFlags) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }

        let mut dirty: Vec<BlockNr> = self
            .cache
            .iter()
            .filter(|(_, c)| c.dirty)
            .map(|(&nr, _)| nr)
            .collect();
        // block 0 and the other positive blocks first
        dirty.sort_by_key(|nr| (nr.is_negative(), nr.value().abs()));

        let mut written = 0;
        for nr in dirty {
            if nr.is_negative() && !flags.all {
                continue;
            }
            if flags.check_interrupt && written > 0 && self.interrupted() {
                debug!(written, "sync interrupted");
                break;
            }
            self.write_cached(nr)?;
            written += 1;
        }

        if flags.fsync {
            if let Some(file) = &self.file {
                file.sync_all()?;
            }
        }
        Ok(())
    }

    fn translate(&mut self, nr: BlockNr) -> BlockNr {
        if !nr.is_negative() {
            return nr;
        }
        match self.trans.remove(&nr) {
            Some(pos) => {
                self.neg_count = self.neg_count.saturating_sub(1);
                pos
            }
            None => nr,
        }
    }

    fn needs_translation(&self) -> bool {
        self.file.is_some() && self.neg_count > 0
    }

    fn is_dirty(&self) -> bool {
        self.cache.values().any(|c| c.dirty) || self.locked.values().any(|&d| d)
    }

    fn locked_count(&self) -> usize {
        self.locked.len()
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn close(self: Box<Self>, delete_file: bool) -> Result<()> {
        let MemFile { file, path, .. } = *self;
        drop(file);
        if let (true, Some(path)) = (delete_file, path) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
