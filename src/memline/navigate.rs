//! Finding the data block that holds a line.

use super::{LockedBlock, Memline, StackFrame};
use crate::block::{Block, PointerBlock};
use crate::error::{MemlineError, Result};
use crate::types::{BlockNr, LineNr};
use tracing::{error, warn};

/// What the caller is going to do with the line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Intent {
    /// Read or replace
    Find,
    /// Insert a line after it; counts on the path grow by one
    Insert,
    /// Delete it; counts on the path shrink by one
    Delete,
    /// Only release the locked block
    FlushOnly,
}

impl Intent {
    fn delta(self) -> isize {
        match self {
            Intent::Insert => 1,
            Intent::Delete => -1,
            Intent::Find | Intent::FlushOnly => 0,
        }
    }
}

impl Memline {
    /// Lock the data block containing `lnum`.
    ///
    /// With `Insert` or `Delete` the line counts of all pointer entries on
    /// the path are adjusted by one in advance. If the descent fails those
    /// adjustments are rolled back and the stack is cleared.
    pub(crate) fn find_line(&mut self, lnum: LineNr, intent: Intent) -> Result<()> {
        if let Some(locked) = self.locked.as_mut() {
            if intent != Intent::FlushOnly && locked.low <= lnum && lnum <= locked.high {
                match intent {
                    Intent::Insert => {
                        locked.lineadd += 1;
                        locked.high += 1;
                    }
                    Intent::Delete => {
                        locked.lineadd -= 1;
                        locked.high -= 1;
                    }
                    _ => {}
                }
                return Ok(());
            }
            self.release_locked()?;
        }
        if intent == Intent::FlushOnly {
            return Ok(());
        }

        let mut adjusted = Vec::new();
        match self.descend(lnum, intent, &mut adjusted) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(lnum, ?intent, error = %e, "cannot find line");
                self.undo_adjustments(&adjusted, intent.delta());
                self.stack.clear();
                Err(e)
            }
        }
    }

    fn descend(&mut self, lnum: LineNr, intent: Intent, adjusted: &mut Vec<(BlockNr, usize)>) -> Result<()> {
        let mut bnum = BlockNr::ROOT;
        let mut page_count = 1;
        let mut low = 1;
        let mut high = self.line_count;

        // a plain lookup can restart from the deepest pointer block that
        // still covers the line
        if intent == Intent::Find {
            match self.stack.iter().rposition(|f| f.low <= lnum && lnum <= f.high) {
                Some(top) => {
                    let frame = self.stack[top];
                    bnum = frame.bnum;
                    low = frame.low;
                    high = frame.high;
                    self.stack.truncate(top);
                }
                None => self.stack.clear(),
            }
        } else {
            self.stack.clear();
        }

        loop {
            let header = self.store.get(bnum, page_count)?;
            match intent {
                Intent::Insert => high += 1,
                Intent::Delete => high = high.saturating_sub(1),
                _ => {}
            }

            let mut pb = match Block::decode(header) {
                Block::Data(block) => {
                    if !block.header_consistent() {
                        self.store.put(block.into_header(), false, false);
                        return Err(MemlineError::corruption(format!("data block {} header inconsistent", bnum)));
                    }
                    self.locked = Some(LockedBlock {
                        block,
                        low,
                        high,
                        lineadd: 0,
                        dirty: false,
                        update_pos: false,
                    });
                    return Ok(());
                }
                Block::Pointer(pb) => pb,
                other => {
                    self.store.put(other.into_header(), false, false);
                    return Err(MemlineError::WrongBlockId {
                        nr: bnum,
                        expected: if self.stack.is_empty() { "pointer" } else { "pointer or data" },
                    });
                }
            };

            let (frame_low, frame_high) = (low, high);
            let found = (0..pb.count()).find(|&idx| {
                let t = pb.entry(idx).line_count;
                if low + t > lnum {
                    true
                } else {
                    low += t;
                    false
                }
            });
            let Some(idx) = found else {
                self.store.put(pb.into_header(), false, false);
                return Err(if lnum > self.line_count {
                    MemlineError::LineOutOfRange {
                        lnum,
                        line_count: self.line_count,
                    }
                } else {
                    MemlineError::LineCountWrong(bnum)
                });
            };

            let mut entry = pb.entry(idx);
            high = low + entry.line_count - 1;

            let mut dirty = false;
            if entry.bnum.is_negative() {
                let translated = self.store.translate(entry.bnum);
                if translated != entry.bnum {
                    entry.bnum = translated;
                    dirty = true;
                }
            }

            self.stack.push(StackFrame {
                bnum,
                low: frame_low,
                high: frame_high,
                index: idx,
            });

            let delta = intent.delta();
            if delta != 0 {
                entry.line_count = entry.line_count.saturating_add_signed(delta);
                adjusted.push((bnum, idx));
                dirty = true;
            }
            pb.set_entry(idx, entry);
            self.store.put(pb.into_header(), dirty, false);

            bnum = entry.bnum;
            page_count = entry.page_count;
        }
    }

    /// Take back line count changes made on the way down a failed descent
    fn undo_adjustments(&mut self, adjusted: &[(BlockNr, usize)], delta: isize) {
        for &(bnum, idx) in adjusted.iter().rev() {
            match self.get_pointer(bnum) {
                Ok(mut pb) => {
                    pb.adjust_line_count(idx, -delta);
                    self.store.put(pb.into_header(), true, false);
                }
                Err(e) => warn!(block = %bnum, error = %e, "cannot undo line count change"),
            }
        }
    }

    /// Check a pointer block out of the store
    pub(crate) fn get_pointer(&mut self, bnum: BlockNr) -> Result<PointerBlock> {
        let header = self.store.get(bnum, 1)?;
        match Block::decode(header) {
            Block::Pointer(pb) => Ok(pb),
            other => {
                self.store.put(other.into_header(), false, false);
                error!(block = %bnum, "pointer block id wrong");
                Err(MemlineError::WrongBlockId {
                    nr: bnum,
                    expected: "pointer",
                })
            }
        }
    }

    /// Put the locked data block back and apply its pending line count
    /// change to the pointer blocks on the stack.
    pub(crate) fn release_locked(&mut self) -> Result<()> {
        self.release_locked_block().map(|_| ())
    }

    /// Like [`Memline::release_locked`], returning the number the block
    /// has in its parent afterwards
    pub(crate) fn release_locked_block(&mut self) -> Result<Option<BlockNr>> {
        let Some(locked) = self.locked.take() else {
            return Ok(None);
        };
        let lineadd = locked.lineadd;
        let mut nr = locked.block.nr();
        self.store.put(locked.block.into_header(), locked.dirty, locked.update_pos);

        // a changed block no longer matches the original file; its parent
        // must point at the block's place in the swap file before the next sync
        if locked.update_pos && nr.is_negative() {
            nr = self.translate_parent_entry(nr)?;
        }
        if lineadd != 0 {
            self.adjust_stack_counts(self.stack.len(), lineadd)?;
        }
        Ok(Some(nr))
    }

    fn translate_parent_entry(&mut self, nr: BlockNr) -> Result<BlockNr> {
        let Some(frame) = self.stack.last().copied() else {
            return Ok(nr);
        };
        let mut pb = self.get_pointer(frame.bnum)?;
        let mut entry = pb.entry(frame.index);
        if entry.bnum != nr {
            warn!(block = %nr, parent = %frame.bnum, "parent entry does not match released block");
            self.store.put(pb.into_header(), false, false);
            return Ok(nr);
        }
        let translated = self.store.translate(nr);
        let changed = translated != nr;
        if changed {
            entry.bnum = translated;
            pb.set_entry(frame.index, entry);
        }
        self.store.put(pb.into_header(), changed, false);
        Ok(translated)
    }

    /// Add `delta` to the followed entry of the bottom `depth` stack frames
    pub(crate) fn adjust_stack_counts(&mut self, depth: usize, delta: isize) -> Result<()> {
        for i in (0..depth).rev() {
            let frame = self.stack[i];
            let mut pb = self.get_pointer(frame.bnum)?;
            pb.adjust_line_count(frame.index, delta);
            self.store.put(pb.into_header(), true, false);
            self.stack[i].high = self.stack[i].high.saturating_add_signed(delta);
        }
        Ok(())
    }
}
