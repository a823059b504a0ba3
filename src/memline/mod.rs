//! The memline: a buffer's lines stored in a tree of blocks.
//!
//! Block 1 is the root pointer block; pointer blocks reference further
//! pointer blocks or data blocks, and data blocks hold the text. At most
//! one data block is checked out ("locked") at a time, together with the
//! range of line numbers it covers. Line count changes made through the
//! locked block are collected in `lineadd` and pushed up the traversal
//! stack when the block is released.
//!
//! A single edited line is kept outside the tree until another line
//! becomes current or the memline is flushed.

mod append;
mod delete;
mod inspect;
mod marks;
mod navigate;
mod sync;

pub use inspect::{MemlineStats, TreeNode, TreeStats};

use crate::block::{Block0, DataBlock, PointerBlock, PointerEntry};
use crate::error::{MemlineError, Result};
use crate::store::{BlockStore, MemFile, SyncFlags};
use crate::types::{BlockNr, LineNr};
use crate::Config;
use navigate::Intent;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One level of the path from the root to the locked data block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StackFrame {
    /// Pointer block at this level
    bnum: BlockNr,
    /// First line covered by the pointer block
    low: LineNr,
    /// Last line covered by the pointer block
    high: LineNr,
    /// Entry that was followed
    index: usize,
}

/// The data block currently checked out
#[derive(Debug)]
struct LockedBlock {
    block: DataBlock,
    /// First line in the block
    low: LineNr,
    /// Last line in the block
    high: LineNr,
    /// Line count change not yet applied to the pointer blocks above
    lineadd: isize,
    /// Block must be written back
    dirty: bool,
    /// Block no longer matches the original file and needs a real position
    update_pos: bool,
}

/// The single line cached outside the tree
#[derive(Debug)]
struct CachedLine {
    lnum: LineNr,
    /// Replacement text not yet written to the block
    edited: Option<Vec<u8>>,
}

/// Per-buffer handle for the line tree
pub struct Memline {
    store: Box<dyn BlockStore>,
    /// Number of lines in the buffer
    line_count: LineNr,
    /// Path from the root to the locked block
    stack: Vec<StackFrame>,
    locked: Option<LockedBlock>,
    line: Option<CachedLine>,
    /// The only line is a placeholder for an empty buffer
    empty: bool,
    /// No line below this one is marked; 0 when nothing is marked
    lowest_marked: LineNr,
    original: Option<PathBuf>,
    /// Modification time of the original file when it was last read or saved
    original_mtime: u64,
    modified: bool,
    fsync: bool,
}

impl std::fmt::Debug for Memline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memline")
            .field("swap_path", &self.store.path())
            .field("line_count", &self.line_count)
            .field("empty", &self.empty)
            .field("locked", &self.locked.as_ref().map(|l| (l.low, l.high)))
            .finish()
    }
}

/// Text as stored in a data block: NUL terminates a line, so NUL bytes
/// are kept as newlines.
fn stored_text(text: &[u8]) -> Cow<'_, [u8]> {
    if text.contains(&0) {
        Cow::Owned(text.iter().map(|&b| if b == 0 { b'\n' } else { b }).collect())
    } else {
        Cow::Borrowed(text)
    }
}

impl Memline {
    /// Open a new memline holding one empty line
    pub fn open(config: &Config) -> Result<Self> {
        let store: Box<dyn BlockStore> = match &config.swap_path {
            Some(path) => {
                let mut mf = MemFile::create(path, config.page_size)?.with_cache_blocks(config.cache_blocks);
                mf.set_interrupt(config.interrupt.clone());
                Box::new(mf)
            }
            None => Box::new(MemFile::memory(config.page_size)?),
        };
        Self::with_store(store, config)
    }

    /// Open a new memline over an empty block store
    pub fn with_store(store: Box<dyn BlockStore>, config: &Config) -> Result<Self> {
        let mut ml = Self {
            store,
            line_count: 1,
            stack: Vec::new(),
            locked: None,
            line: None,
            empty: true,
            lowest_marked: 0,
            original: config.original.clone(),
            original_mtime: 0,
            modified: false,
            fsync: config.fsync,
        };
        ml.create_blocks()?;
        Ok(ml)
    }

    /// Write block 0, the root pointer block and the first data block
    fn create_blocks(&mut self) -> Result<()> {
        let page_size = self.store.page_size();

        let mut header = self.store.new_block(false, 1)?;
        if header.nr() != BlockNr::ZERO {
            self.store.free(header);
            return Err(MemlineError::corruption("did not get block 0"));
        }
        let mut b0 = Block0::new(page_size);
        b0.set_file(self.original.as_deref());
        b0.write(header.data_mut());
        self.original_mtime = b0.mtime;
        self.store.put(header, true, false);

        // block 0 goes to disk right away so the swap file can be identified
        if self.store.path().is_some() {
            self.store.sync(SyncFlags {
                fsync: self.fsync,
                ..SyncFlags::default()
            })?;
        }

        let header = self.store.new_block(false, 1)?;
        if header.nr() != BlockNr::ROOT {
            self.store.free(header);
            return Err(MemlineError::corruption("did not get block 1"));
        }
        let mut root = PointerBlock::init(header);
        root.insert_entry(
            0,
            PointerEntry {
                bnum: BlockNr::FIRST_DATA,
                line_count: 1,
                old_lnum: 1,
                page_count: 1,
            },
        );
        self.store.put(root.into_header(), true, false);

        let header = self.store.new_block(false, 1)?;
        if header.nr() != BlockNr::FIRST_DATA {
            self.store.free(header);
            return Err(MemlineError::corruption("did not get block 2"));
        }
        let mut data = DataBlock::init(header);
        data.push_line(b"");
        self.store.put(data.into_header(), true, false);

        debug!(swap = ?self.store.path(), page_size, "opened memline");
        Ok(())
    }

    /// Close the memline, optionally deleting the swap file.
    ///
    /// The cached line and locked block go back to the store, but nothing
    /// is written to the swap file; call [`Memline::sync`] first to keep them.
    pub fn close(mut self, delete_swap: bool) -> Result<()> {
        self.flush()?;
        self.store.close(delete_swap)
    }

    /// Number of lines; an empty buffer has one empty line
    pub fn line_count(&self) -> LineNr {
        self.line_count
    }

    /// True when the buffer holds only the placeholder empty line
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// True when the cached line holds an edit not yet written to its block
    pub fn is_line_dirty(&self) -> bool {
        matches!(self.line, Some(CachedLine { edited: Some(_), .. }))
    }

    /// True when lines were changed since the memline was loaded or saved
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Forget about changes, e.g. after the buffer was written
    pub fn set_unmodified(&mut self) {
        self.modified = false;
    }

    /// Swap file path, `None` when memory-only
    pub fn swap_path(&self) -> Option<&Path> {
        self.store.path()
    }

    /// Original file recorded in block 0
    pub fn original(&self) -> Option<&Path> {
        self.original.as_deref()
    }

    /// Number of blocks checked out of the store; never more than one
    pub fn locked_block_count(&self) -> usize {
        self.store.locked_count()
    }

    fn check_lnum(&self, lnum: LineNr) -> Result<()> {
        if lnum == 0 || lnum > self.line_count {
            return Err(MemlineError::LineOutOfRange {
                lnum,
                line_count: self.line_count,
            });
        }
        Ok(())
    }

    fn locked_mut(&mut self) -> Result<&mut LockedBlock> {
        self.locked
            .as_mut()
            .ok_or_else(|| MemlineError::invalid_operation("no data block locked"))
    }

    /// Text of line `lnum`. Line 0 reads line 1.
    pub fn get_line(&mut self, lnum: LineNr) -> Result<&[u8]> {
        if lnum > self.line_count {
            return Err(MemlineError::LineOutOfRange {
                lnum,
                line_count: self.line_count,
            });
        }
        let lnum = lnum.max(1);

        let cached_edit = matches!(&self.line, Some(CachedLine { lnum: l, edited: Some(_) }) if *l == lnum);
        if !cached_edit {
            if self.line.as_ref().map(|l| l.lnum) != Some(lnum) {
                self.flush_line()?;
            }
            self.find_line(lnum, Intent::Find)?;
            self.line = Some(CachedLine { lnum, edited: None });
        }

        match (&self.line, &self.locked) {
            (Some(CachedLine { edited: Some(text), .. }), _) => Ok(text.as_slice()),
            (_, Some(locked)) => Ok(locked.block.line(lnum - locked.low)),
            _ => Err(MemlineError::invalid_operation("no data block locked")),
        }
    }

    /// Text of line `lnum` as a string, invalid UTF-8 replaced
    pub fn line_string(&mut self, lnum: LineNr) -> Result<String> {
        Ok(String::from_utf8_lossy(self.get_line(lnum)?).into_owned())
    }

    /// All lines in order
    pub fn to_lines(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut lines = Vec::with_capacity(self.line_count);
        for lnum in 1..=self.line_count {
            lines.push(self.get_line(lnum)?.to_vec());
        }
        Ok(lines)
    }

    /// Insert `text` as a new line after line `lnum` (0 inserts at the top)
    pub fn append(&mut self, lnum: LineNr, text: &[u8]) -> Result<()> {
        if lnum > self.line_count {
            return Err(MemlineError::LineOutOfRange {
                lnum,
                line_count: self.line_count,
            });
        }
        self.flush_line()?;
        self.append_int(lnum, &stored_text(text), false)?;
        self.modified = true;
        Ok(())
    }

    /// Delete line `lnum`; the last remaining line is emptied instead
    pub fn delete(&mut self, lnum: LineNr) -> Result<()> {
        self.check_lnum(lnum)?;
        self.flush_line()?;
        self.delete_int(lnum)?;
        self.modified = true;
        Ok(())
    }

    /// Replace the text of line `lnum`.
    ///
    /// The new text is cached and written to its block when another line
    /// becomes current or the memline is flushed.
    pub fn replace(&mut self, lnum: LineNr, text: &[u8]) -> Result<()> {
        self.check_lnum(lnum)?;
        self.replace_int(lnum, stored_text(text).into_owned())?;
        self.modified = true;
        Ok(())
    }

    fn replace_int(&mut self, lnum: LineNr, text: Vec<u8>) -> Result<()> {
        if self.line.as_ref().map(|l| l.lnum) != Some(lnum) {
            self.flush_line()?;
        }
        self.line = Some(CachedLine {
            lnum,
            edited: Some(text),
        });
        self.empty = false;
        Ok(())
    }

    /// Write the cached edited line into its data block
    pub(crate) fn flush_line(&mut self) -> Result<()> {
        let Some(CachedLine {
            lnum,
            edited: Some(text),
        }) = self.line.take()
        else {
            return Ok(());
        };

        self.find_line(lnum, Intent::Find)?;
        let locked = self.locked_mut()?;
        let idx = lnum - locked.low;
        if locked.block.replace_line(idx, &text) {
            locked.dirty = true;
            locked.update_pos = true;
            return Ok(());
        }

        // does not fit: add the new text as the next line, drop the old one
        debug!(lnum, len = text.len(), "replacement does not fit in block");
        self.append_int(lnum, &text, false)?;
        self.delete_int(lnum)
    }

    /// Load the lines of an unchanged text file into an empty memline.
    ///
    /// The text goes into blocks with negative numbers, which are not
    /// written to the swap file while they match the file. Returns the
    /// number of lines read.
    pub fn load_file(&mut self, path: &Path) -> Result<LineNr> {
        if !self.empty || self.line_count != 1 {
            return Err(MemlineError::invalid_operation("can only load into an empty memline"));
        }
        let lines = crate::original::read_lines(path)?;
        self.line = None;

        for (i, line) in lines.iter().enumerate() {
            self.append_int(i, line, true)?;
        }
        if !lines.is_empty() {
            // the placeholder line is now the last one
            self.delete_int(self.line_count)?;
        }

        self.original = Some(path.to_path_buf());
        self.timestamp()?;
        self.modified = false;
        debug!(path = %path.display(), lines = lines.len(), "loaded file");
        Ok(lines.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    pub(crate) fn memory(page_size: usize) -> Memline {
        Memline::open(&Config::memory().page_size(page_size)).unwrap()
    }

    pub(crate) fn text(lnum: usize, width: usize) -> Vec<u8> {
        let mut t = format!("line {:05} ", lnum).into_bytes();
        while t.len() < width {
            t.push(b'a' + (t.len() % 26) as u8);
        }
        t
    }

    #[test]
    fn test_fresh_memline() -> Result<()> {
        let mut ml = memory(crate::PAGE_SIZE);
        assert_eq!(ml.line_count(), 1);
        assert!(ml.is_empty());
        assert_eq!(ml.get_line(1)?, b"");
        assert_eq!(ml.get_line(0)?, b"");
        assert!(matches!(ml.get_line(2), Err(MemlineError::LineOutOfRange { .. })));
        Ok(())
    }

    #[test]
    fn test_append_and_read() -> Result<()> {
        let mut ml = memory(crate::PAGE_SIZE);
        ml.append(1, b"second")?;
        ml.append(0, b"zeroth")?;
        ml.append(3, b"third")?;
        assert!(!ml.is_empty());
        assert_eq!(
            ml.to_lines()?,
            vec![b"zeroth".to_vec(), b"".to_vec(), b"second".to_vec(), b"third".to_vec()]
        );
        assert!(matches!(ml.append(9, b"x"), Err(MemlineError::LineOutOfRange { .. })));
        Ok(())
    }

    #[test]
    fn test_replace_is_cached_until_flush() -> Result<()> {
        let mut ml = memory(crate::PAGE_SIZE);
        ml.append(1, b"two")?;
        ml.replace(1, b"one")?;
        assert!(ml.is_line_dirty());
        assert_eq!(ml.get_line(1)?, b"one");

        // reading another line writes the edit into the block
        assert_eq!(ml.get_line(2)?, b"two");
        assert!(!ml.is_line_dirty());
        assert_eq!(ml.get_line(1)?, b"one");
        Ok(())
    }

    #[test]
    fn test_replace_larger_than_block_space() -> Result<()> {
        let mut ml = memory(1024);
        for i in 1..=30 {
            ml.append(i - 1, &text(i, 20))?;
        }
        let long = vec![b'L'; 900];
        ml.replace(10, &long)?;
        ml.flush()?;
        assert_eq!(ml.get_line(10)?, &long[..]);
        assert_eq!(ml.get_line(9)?, &text(9, 20)[..]);
        assert_eq!(ml.get_line(11)?, &text(11, 20)[..]);
        assert_eq!(ml.line_count(), 31);
        ml.verify()?;
        Ok(())
    }

    #[test]
    fn test_nul_bytes_stored_as_newline() -> Result<()> {
        let mut ml = memory(crate::PAGE_SIZE);
        ml.replace(1, b"a\0b")?;
        ml.flush()?;
        assert_eq!(ml.get_line(1)?, b"a\nb");
        Ok(())
    }

    #[test]
    fn test_load_file_into_memory() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("orig.txt");
        std::fs::write(&path, "alpha\nbeta\ngamma\n")?;

        let mut ml = memory(crate::PAGE_SIZE);
        assert_eq!(ml.load_file(&path)?, 3);
        assert_eq!(ml.to_lines()?, vec![b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()]);
        assert!(!ml.is_modified());
        assert!(ml.load_file(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_close_removes_swap() -> Result<()> {
        let dir = tempdir().unwrap();
        let swap = dir.path().join("buf.swp");
        let mut ml = Memline::open(&Config::new(&swap))?;
        ml.append(1, b"text")?;
        assert!(swap.exists());
        ml.close(true)?;
        assert!(!swap.exists());
        Ok(())
    }
}
