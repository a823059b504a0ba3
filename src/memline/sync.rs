//! Writing the memline to its swap file.

use super::navigate::Intent;
use super::Memline;
use crate::block::{file_stamp, Block, Block0};
use crate::error::{MemlineError, Result};
use crate::store::SyncFlags;
use crate::types::BlockNr;
use std::path::Path;
use tracing::{debug, info, warn};

impl Memline {
    /// Write the cached line to its block and release the locked block
    pub fn flush(&mut self) -> Result<()> {
        self.flush_line()?;
        self.find_line(0, Intent::FlushOnly)
    }

    /// Write changed blocks to the swap file.
    ///
    /// With `check_file`, a changed buffer whose original file was modified
    /// or removed is preserved first, because blocks that are still only
    /// in the original file could no longer be recovered.
    pub fn sync(&mut self, check_file: bool) -> Result<()> {
        if self.store.path().is_none() {
            return Ok(());
        }
        self.flush()?;

        if self.modified && check_file && self.store.needs_translation() && self.original_changed() {
            warn!(original = ?self.original, "original file changed, preserving");
            self.preserve_blocks()?;
        }

        if self.store.is_dirty() {
            self.store.sync(SyncFlags {
                all: false,
                check_interrupt: true,
                fsync: self.fsync,
            })?;
        }
        Ok(())
    }

    /// Write every block, including those that still match the original
    /// file, so the swap file alone is enough for recovery.
    pub fn preserve(&mut self) -> Result<()> {
        if self.store.path().is_none() {
            return Err(MemlineError::invalid_operation("no swap file to preserve into"));
        }
        self.flush()?;
        self.preserve_blocks()?;
        info!(swap = ?self.store.path(), "file preserved");
        Ok(())
    }

    fn preserve_blocks(&mut self) -> Result<()> {
        let flags = SyncFlags {
            all: true,
            check_interrupt: false,
            fsync: true,
        };
        let result = self.write_all_blocks(flags);
        // frames may hold line ranges from before the translation
        self.stack.clear();
        result
    }

    fn write_all_blocks(&mut self, flags: SyncFlags) -> Result<()> {
        self.find_line(0, Intent::FlushOnly)?;
        self.store.sync(flags)?;
        if !self.store.needs_translation() {
            return Ok(());
        }

        // visit every data block so the pointer entries get their final numbers
        let mut lnum = 1;
        while self.store.needs_translation() && lnum <= self.line_count {
            self.find_line(lnum, Intent::Find)?;
            lnum = self.locked_mut()?.high + 1;
        }
        self.find_line(0, Intent::FlushOnly)?;
        self.store.sync(flags)
    }

    /// Record the current name, modification time and inode of the
    /// original file in block 0, e.g. after the buffer was written
    pub fn timestamp(&mut self) -> Result<()> {
        let header = self.store.get(BlockNr::ZERO, 1)?;
        let mut header = match Block::decode(header) {
            Block::Zero(header) => header,
            other => {
                self.store.put(other.into_header(), false, false);
                return Err(MemlineError::WrongBlockId {
                    nr: BlockNr::ZERO,
                    expected: "block 0",
                });
            }
        };
        let mut b0 = match Block0::read(header.data()) {
            Ok(b0) => b0,
            Err(e) => {
                self.store.put(header, false, false);
                return Err(e);
            }
        };
        b0.set_file(self.original.as_deref());
        b0.write(header.data_mut());
        self.original_mtime = b0.mtime;
        self.store.put(header, true, false);
        debug!(original = ?self.original, mtime = b0.mtime, "updated block 0");
        Ok(())
    }

    /// Change the original file recorded in block 0
    pub fn set_original(&mut self, path: Option<&Path>) -> Result<()> {
        self.original = path.map(Path::to_path_buf);
        self.timestamp()
    }

    fn original_changed(&self) -> bool {
        match &self.original {
            Some(path) => file_stamp(path).0 != self.original_mtime,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::block::Block0;
    use crate::error::Result;
    use crate::memline::tests::text;
    use crate::memline::Memline;
    use crate::types::PAGE_SIZE;
    use crate::Config;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_sync_writes_block0_and_changes() -> Result<()> {
        let dir = tempdir().unwrap();
        let swap = dir.path().join("buf.swp");
        let mut ml = Memline::open(&Config::new(&swap))?;

        let bytes = fs::read(&swap)?;
        assert!(Block0::is_block0(&bytes));
        assert!(Block0::magic_matches(&bytes));
        assert_eq!(Block0::read(&bytes)?.page_size, PAGE_SIZE);

        ml.append(1, b"hello")?;
        ml.sync(false)?;
        assert!(fs::metadata(&swap)?.len() >= 3 * PAGE_SIZE as u64);
        ml.close(true)?;
        Ok(())
    }

    #[test]
    fn test_loaded_text_stays_out_of_swap_until_preserved() -> Result<()> {
        let dir = tempdir().unwrap();
        let orig = dir.path().join("orig.txt");
        let contents: Vec<String> = (1..=400)
            .map(|i| String::from_utf8(text(i, 60)).unwrap())
            .collect();
        fs::write(&orig, contents.join("\n") + "\n")?;

        let swap = dir.path().join("orig.txt.swp");
        let mut ml = Memline::open(&Config::new(&swap).page_size(1024))?;
        assert_eq!(ml.load_file(&orig)?, 400);
        ml.sync(false)?;
        let synced = fs::metadata(&swap)?.len();
        assert!(ml.store.needs_translation());

        ml.preserve()?;
        assert!(!ml.store.needs_translation());
        let preserved = fs::metadata(&swap)?.len();
        assert!(preserved > synced);
        assert_eq!(ml.get_line(400)?, &text(400, 60)[..]);
        ml.verify()?;
        Ok(())
    }

    #[test]
    fn test_edited_loaded_blocks_need_no_translation() -> Result<()> {
        let dir = tempdir().unwrap();
        let orig = dir.path().join("edit.txt");
        let contents: Vec<String> = (1..=100)
            .map(|i| String::from_utf8(text(i, 60)).unwrap())
            .collect();
        fs::write(&orig, contents.join("\n") + "\n")?;

        let swap = dir.path().join("edit.txt.swp");
        let mut ml = Memline::open(&Config::new(&swap).page_size(1024))?;
        ml.load_file(&orig)?;
        assert!(ml.stats().needs_translation);

        for lnum in 1..=100 {
            ml.replace(lnum, &text(1000 + lnum, 60))?;
        }
        // split the former loaded blocks again
        for i in 0..40 {
            ml.append(50 + i, &text(2000 + i, 60))?;
        }
        ml.flush()?;
        assert!(!ml.stats().needs_translation);

        ml.sync(false)?;
        assert_eq!(ml.line_count(), 140);
        assert_eq!(ml.get_line(51)?, &text(2000, 60)[..]);
        ml.verify()?;
        Ok(())
    }

    #[test]
    fn test_preserve_needs_swap() {
        let mut ml = Memline::open(&Config::memory()).unwrap();
        assert!(ml.preserve().is_err());
        assert!(ml.sync(true).is_ok());
    }

    #[test]
    fn test_set_original_updates_block0() -> Result<()> {
        let dir = tempdir().unwrap();
        let orig = dir.path().join("a.txt");
        fs::write(&orig, "x\n")?;
        let swap = dir.path().join("a.swp");
        let mut ml = Memline::open(&Config::new(&swap))?;
        ml.set_original(Some(&orig))?;
        ml.sync(false)?;

        let b0 = Block0::read(&fs::read(&swap)?)?;
        assert_eq!(b0.file_name, orig.to_string_lossy());
        assert!(b0.mtime > 0);
        Ok(())
    }
}
