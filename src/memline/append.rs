//! Inserting lines, splitting data blocks and pointer blocks.

use super::navigate::Intent;
use super::Memline;
use crate::block::{DataBlock, PointerBlock, PointerEntry, PointerNode, DATA_HEADER_SIZE, INDEX_SIZE};
use crate::error::{MemlineError, Result};
use crate::types::{BlockNr, LineNr};
use tracing::{debug, error};

/// A block that has to be (re)entered in its parent after a split
#[derive(Debug, Clone, Copy)]
struct Child {
    bnum: BlockNr,
    line_count: LineNr,
    page_count: usize,
    /// First line in the original file, 0 when unknown
    old_lnum: LineNr,
}

impl Child {
    fn entry(self, old_lnum: LineNr) -> PointerEntry {
        PointerEntry {
            bnum: self.bnum,
            line_count: self.line_count,
            old_lnum,
            page_count: self.page_count,
        }
    }

    /// Entry for the slot this block already had; an unknown original
    /// line number keeps the previous one
    fn update(self, previous: PointerEntry) -> PointerEntry {
        let old_lnum = if self.old_lnum == 0 { previous.old_lnum } else { self.old_lnum };
        self.entry(old_lnum)
    }
}

impl Memline {
    /// Insert `text` after line `lnum`.
    ///
    /// `newfile` is set while reading the original file: new data blocks
    /// then get negative numbers and are not written until modified.
    pub(crate) fn append_int(&mut self, lnum: LineNr, text: &[u8], newfile: bool) -> Result<()> {
        if lnum > self.line_count {
            return Err(MemlineError::LineOutOfRange {
                lnum,
                line_count: self.line_count,
            });
        }
        if self.lowest_marked > lnum {
            self.lowest_marked = lnum + 1;
        }

        let space_needed = text.len() + 1 + INDEX_SIZE;
        self.find_line(lnum.max(1), Intent::Insert)?;
        self.empty = false;

        let (mut db_idx, block_lines, free) = {
            let locked = self.locked_mut()?;
            let idx = if lnum == 0 { None } else { Some(lnum - locked.low) };
            (idx, locked.high - locked.low, locked.block.free())
        };

        // appending after the last line of a full block: try the start of
        // the next block instead
        if free < space_needed && lnum < self.line_count && block_lines.checked_sub(1) == db_idx {
            let locked = self.locked_mut()?;
            locked.lineadd -= 1;
            locked.high -= 1;
            self.find_line(lnum + 1, Intent::Insert)?;
            db_idx = None;
        }

        let locked = self.locked_mut()?;
        if locked.block.free() >= space_needed {
            let pos = db_idx.map_or(0, |i| i + 1);
            locked.block.insert_line(pos, text);
            locked.dirty = true;
            if !newfile {
                locked.update_pos = true;
            }
            self.line_count += 1;
            return Ok(());
        }

        self.split_and_insert(lnum, text, db_idx, newfile)
    }

    /// Split the locked data block in two and insert the new line in one
    /// of the halves.
    fn split_and_insert(&mut self, lnum: LineNr, text: &[u8], db_idx: Option<usize>, newfile: bool) -> Result<()> {
        let page_size = self.store.page_size();
        let mut space_needed = text.len() + 1 + INDEX_SIZE;

        // lines after the insert position move to the right block; the new
        // line goes left if it fits there together with the moved lines'
        // former space, otherwise it goes with them
        let (lines_moved, in_left) = {
            let locked = self.locked_mut()?;
            match db_idx {
                None => (0, true),
                Some(idx) => {
                    let lines_moved = locked.block.line_count() - idx - 1;
                    if lines_moved == 0 {
                        (0, false)
                    } else {
                        let total_moved = locked.block.tail_size(idx + 1) + lines_moved * INDEX_SIZE;
                        if locked.block.free() + total_moved >= space_needed {
                            space_needed = total_moved;
                            (lines_moved, true)
                        } else {
                            space_needed += total_moved;
                            (lines_moved, false)
                        }
                    }
                }
            }
        };

        // every allocation happens before the first block is changed
        let mut spare = match self.reserve_pointer_blocks() {
            Ok(spare) => spare,
            Err(e) => {
                error!(lnum, error = %e, "cannot allocate pointer blocks");
                self.abandon_insert()?;
                return Err(e);
            }
        };
        let page_count = (space_needed + DATA_HEADER_SIZE).div_ceil(page_size);
        let mut new_block = match self.store.new_block(newfile, page_count) {
            Ok(header) => DataBlock::init(header),
            Err(e) => {
                error!(lnum, page_count, error = %e, "cannot allocate data block");
                self.release_spare(spare);
                self.abandon_insert()?;
                return Err(e);
            }
        };
        self.line_count += 1;

        let (left, right, lineadd) = {
            let locked = self.locked_mut()?;
            let (left, right) = if db_idx.is_none() {
                (&mut new_block, &mut locked.block)
            } else {
                (&mut locked.block, &mut new_block)
            };

            if !in_left {
                right.push_line(text);
            }
            if lines_moved > 0 {
                let from = left.line_count() - lines_moved;
                left.move_tail(from, right);
            }
            if in_left {
                left.push_line(text);
            }

            let (lnum_left, lnum_right) = match db_idx {
                None => (lnum + 1, 0),
                Some(_) if in_left => (0, lnum + 2),
                Some(_) => (0, lnum + 1),
            };
            let left = Child {
                bnum: left.nr(),
                line_count: left.line_count(),
                page_count: left.page_count(),
                old_lnum: lnum_left,
            };
            let right = Child {
                bnum: right.nr(),
                line_count: right.line_count(),
                page_count: right.page_count(),
                old_lnum: lnum_right,
            };

            if lines_moved > 0 || in_left {
                locked.dirty = true;
            }
            if !newfile && db_idx.is_some() && in_left {
                locked.update_pos = true;
            }
            (left, right, std::mem::take(&mut locked.lineadd))
        };

        debug!(
            lnum,
            left = %left.bnum,
            right = %right.bnum,
            lines_moved,
            in_left,
            "split data block"
        );
        self.store.put(new_block.into_header(), true, false);
        let (mut left, mut right) = (left, right);
        if let Some(nr) = self.release_locked_block()? {
            if db_idx.is_none() {
                right.bnum = nr;
            } else {
                left.bnum = nr;
            }
        }

        let result = self.insert_split_entry(left, right, lineadd, &mut spare);
        self.release_spare(spare);
        result
    }

    /// Take back the line the locked block was expecting
    fn abandon_insert(&mut self) -> Result<()> {
        let locked = self.locked_mut()?;
        locked.lineadd -= 1;
        locked.high -= 1;
        Ok(())
    }

    /// Allocate the pointer blocks a split of the locked block needs on
    /// its way up: one per full pointer block, two for a full root.
    fn reserve_pointer_blocks(&mut self) -> Result<Vec<PointerBlock>> {
        let mut needed = 0;
        for i in (0..self.stack.len()).rev() {
            let bnum = self.stack[i].bnum;
            let pb = self.get_pointer(bnum)?;
            let full = pb.is_full();
            self.store.put(pb.into_header(), false, false);
            if !full {
                break;
            }
            needed += if bnum.is_root() { 2 } else { 1 };
        }

        let mut spare = Vec::with_capacity(needed);
        for _ in 0..needed {
            match self.new_pointer_block() {
                Ok(pb) => spare.push(pb),
                Err(e) => {
                    self.release_spare(spare);
                    return Err(e);
                }
            }
        }
        Ok(spare)
    }

    fn release_spare(&mut self, spare: Vec<PointerBlock>) {
        for pb in spare {
            self.store.free(pb.into_header());
        }
    }

    /// Record a split in the pointer blocks on the stack, splitting full
    /// pointer blocks on the way up. A full root moves its entries into a
    /// new child so that it stays block 1.
    fn insert_split_entry(
        &mut self,
        mut left: Child,
        mut right: Child,
        lineadd: isize,
        spare: &mut Vec<PointerBlock>,
    ) -> Result<()> {
        let mut stack_idx = self.stack.len();
        while stack_idx > 0 {
            stack_idx -= 1;
            let frame = self.stack[stack_idx];
            let pb_idx = frame.index;
            let mut pb = self.get_pointer(frame.bnum)?;

            if !pb.is_full() {
                let previous = pb.entry(pb_idx);
                pb.insert_entry(pb_idx + 1, right.entry(right.old_lnum));
                pb.set_entry(pb_idx, left.update(previous));
                self.store.put(pb.into_header(), true, false);

                self.stack.truncate(stack_idx + 1);
                if lineadd != 0 {
                    self.adjust_stack_counts(stack_idx, lineadd)?;
                    let frame = &mut self.stack[stack_idx];
                    frame.high = frame.high.saturating_add_signed(lineadd);
                }
                return Ok(());
            }

            let sibling = match self.take_spare(spare) {
                Ok(block) => block,
                Err(e) => {
                    self.store.put(pb.into_header(), false, false);
                    return Err(e);
                }
            };
            let (mut pb, mut sibling) = match PointerNode::classify(pb) {
                PointerNode::Root(root) => {
                    let (root, copy) = root.deepen(sibling, self.line_count);
                    debug!(child = %copy.nr(), "root pointer block full, adding a level");
                    self.store.put(root.into_header(), true, false);
                    self.stack[stack_idx].index = 0;
                    stack_idx += 1;
                    match self.take_spare(spare) {
                        Ok(block) => (copy, block),
                        Err(e) => {
                            self.store.put(copy.into_header(), true, false);
                            return Err(e);
                        }
                    }
                }
                PointerNode::Branch(pb) => (pb, sibling),
            };

            // entries after the split point go to the sibling
            let moved = pb.copy_tail_to(pb_idx + 1, &mut sibling);
            if moved > 0 {
                pb.set_count(pb_idx + 2);
                pb.set_entry(pb_idx + 1, right.entry(right.old_lnum));
            } else {
                sibling.set_count(1);
                sibling.set_entry(0, right.entry(right.old_lnum));
            }
            let previous = pb.entry(pb_idx);
            pb.set_entry(pb_idx, left.update(previous));

            debug!(block = %pb.nr(), sibling = %sibling.nr(), moved, "split pointer block");
            left = Child {
                bnum: pb.nr(),
                line_count: pb.total_lines(),
                page_count: 1,
                old_lnum: 0,
            };
            right = Child {
                bnum: sibling.nr(),
                line_count: sibling.total_lines(),
                page_count: 1,
                old_lnum: 0,
            };
            self.store.put(pb.into_header(), true, false);
            self.store.put(sibling.into_header(), true, false);
        }

        error!("split propagated past the root");
        self.stack.clear();
        Err(MemlineError::TooManyBlocks)
    }

    fn take_spare(&mut self, spare: &mut Vec<PointerBlock>) -> Result<PointerBlock> {
        match spare.pop() {
            Some(pb) => Ok(pb),
            None => self.new_pointer_block(),
        }
    }

    fn new_pointer_block(&mut self) -> Result<PointerBlock> {
        let header = self.store.new_block(false, 1)?;
        Ok(PointerBlock::init(header))
    }
}

#[cfg(test)]
mod tests {
    use crate::block::Block;
    use crate::error::Result;
    use crate::memline::tests::{memory, text};
    use crate::types::BlockNr;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_growth_keeps_order() -> Result<()> {
        let mut ml = memory(crate::PAGE_SIZE);
        for i in 1..=500 {
            ml.append(i - 1, format!("line {}", i).as_bytes())?;
        }
        assert_eq!(ml.line_count(), 501);

        let tree = ml.export_tree()?;
        assert!(tree.children.len() >= 2);
        assert!(tree.children.iter().all(|c| c.is_data));
        assert_eq!(tree.children.iter().map(|c| c.line_count).sum::<usize>(), 501);

        for i in 1..=500 {
            assert_eq!(ml.line_string(i)?, format!("line {}", i));
        }
        assert_eq!(ml.get_line(501)?, b"");
        assert_eq!(ml.verify()?.line_count, 501);
        assert_eq!(ml.locked_block_count(), 0);
        ml.get_line(250)?;
        assert_eq!(ml.locked_block_count(), 1);
        Ok(())
    }

    #[test]
    fn test_insert_at_top_repeatedly() -> Result<()> {
        let mut ml = memory(1024);
        for i in 1..=300 {
            ml.append(0, &text(i, 30))?;
        }
        for i in 1..=300 {
            assert_eq!(ml.get_line(i)?, &text(301 - i, 30)[..]);
        }
        ml.verify()?;
        Ok(())
    }

    #[test]
    fn test_append_after_last_line_of_full_block() -> Result<()> {
        let mut ml = memory(1024);
        let width = 40;

        // append at the end until a line no longer fits in the only block
        let (before, lines_before) = loop {
            let before = ml.export_tree()?;
            let lines_before = ml.to_lines()?;
            let n = ml.line_count();
            ml.append(n, &text(n, width))?;
            if ml.export_tree()?.children.len() > before.children.len() {
                break (before, lines_before);
            }
        };
        assert_eq!(before.children.len(), 1);

        // the new line sits alone in a new block to the right
        let after = ml.export_tree()?;
        assert_eq!(after.children.len(), 2);
        let (left, right) = (&after.children[0], &after.children[1]);
        assert_eq!(left.block_nr, before.children[0].block_nr);
        assert_eq!(left.line_count, before.children[0].line_count);
        assert_eq!(left.free, before.children[0].free);
        assert_eq!(right.line_count, 1);
        assert_ne!(right.block_nr, left.block_nr);

        let lines = ml.to_lines()?;
        assert_eq!(lines[..lines_before.len()], lines_before[..]);
        assert_eq!(lines.last(), Some(&text(lines_before.len(), width)));

        // after the last line of the full block, the line goes to the start
        // of the next block
        let boundary = left.line_count;
        let left_free = left.free;
        ml.append(boundary, &text(999, width))?;
        let tree = ml.export_tree()?;
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].line_count, boundary);
        assert_eq!(tree.children[0].free, left_free);
        assert_eq!(tree.children[1].line_count, 2);
        assert_eq!(ml.get_line(boundary + 1)?, &text(999, width)[..]);
        ml.verify()?;
        Ok(())
    }

    #[test]
    fn test_line_larger_than_page() -> Result<()> {
        let mut ml = memory(1024);
        let long = vec![b'x'; 3000];
        ml.append(1, &long)?;
        ml.append(2, b"after")?;
        assert_eq!(ml.get_line(2)?, &long[..]);
        assert_eq!(ml.get_line(3)?, b"after");
        ml.flush()?;

        let tree = ml.export_tree()?;
        assert!(tree.children.iter().any(|c| c.page_count >= 3));
        ml.verify()?;
        Ok(())
    }

    #[test]
    fn test_root_stays_block_one() -> Result<()> {
        let mut ml = memory(1024);
        for i in 1..=3000 {
            ml.append(i - 1, &text(i, 20))?;
        }
        ml.flush()?;
        let header = ml.store.get(BlockNr::ROOT, 1)?;
        let block = Block::decode(header);
        assert_eq!(block.kind(), "pointer");
        ml.store.put(block.into_header(), false, false);

        let stats = ml.verify()?;
        assert!(stats.depth >= 3);
        assert_eq!(ml.get_line(1234)?, &text(1234, 20)[..]);
        Ok(())
    }
}
