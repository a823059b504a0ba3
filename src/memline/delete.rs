//! Deleting lines and dropping emptied blocks from the tree.

use super::navigate::Intent;
use super::Memline;
use crate::block::PointerNode;
use crate::error::{MemlineError, Result};
use crate::types::LineNr;
use tracing::{debug, error};

impl Memline {
    /// Delete line `lnum`. The only remaining line is emptied instead.
    pub(crate) fn delete_int(&mut self, lnum: LineNr) -> Result<()> {
        self.check_lnum(lnum)?;
        if self.lowest_marked > lnum {
            self.lowest_marked -= 1;
        }

        if self.line_count == 1 {
            self.replace_int(1, Vec::new())?;
            self.empty = true;
            return Ok(());
        }

        self.find_line(lnum, Intent::Delete)?;
        let (count, idx) = {
            let locked = self.locked_mut()?;
            (locked.block.line_count(), lnum - locked.low)
        };
        self.line_count -= 1;

        if count == 1 {
            return self.free_locked_block();
        }

        let locked = self.locked_mut()?;
        locked.block.delete_line(idx);
        locked.dirty = true;
        locked.update_pos = true;
        Ok(())
    }

    /// The locked block lost its last line: free it and remove its entry,
    /// freeing pointer blocks that become empty on the way up.
    fn free_locked_block(&mut self) -> Result<()> {
        let Some(locked) = self.locked.take() else {
            return Err(MemlineError::invalid_operation("no data block locked"));
        };
        let lineadd = locked.lineadd;
        debug!(block = %locked.block.nr(), "data block empty, freeing");
        self.store.free(locked.block.into_header());

        let mut stack_idx = self.stack.len();
        while stack_idx > 0 {
            stack_idx -= 1;
            let frame = self.stack[stack_idx];
            let pb = match self.get_pointer(frame.bnum) {
                Ok(pb) => pb,
                Err(e) => {
                    self.stack.clear();
                    return Err(e);
                }
            };

            let mut pb = match PointerNode::classify(pb) {
                PointerNode::Branch(pb) if pb.count() == 1 => {
                    debug!(block = %pb.nr(), "pointer block empty, freeing");
                    self.store.free(pb.into_header());
                    continue;
                }
                PointerNode::Root(root) if root.count() == 1 => {
                    self.store.put(root.into_header(), false, false);
                    self.stack.clear();
                    error!("root pointer block would become empty");
                    return Err(MemlineError::invalid_operation("deleted block 1"));
                }
                PointerNode::Root(root) => root.into_inner(),
                PointerNode::Branch(pb) => pb,
            };

            pb.remove_entry(frame.index);
            self.store.put(pb.into_header(), true, false);

            self.stack.truncate(stack_idx + 1);
            if lineadd != 0 {
                self.adjust_stack_counts(stack_idx, lineadd)?;
                let frame = &mut self.stack[stack_idx];
                frame.high = frame.high.saturating_add_signed(lineadd);
            }
            return Ok(());
        }

        self.stack.clear();
        Err(MemlineError::invalid_operation("deleted block 1"))
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Result;
    use crate::memline::tests::{memory, text};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_delete_last_line_empties_buffer() -> Result<()> {
        let mut ml = memory(crate::PAGE_SIZE);
        ml.append(1, b"x")?;
        ml.delete(1)?;
        ml.delete(1)?;
        assert_eq!(ml.line_count(), 1);
        assert!(ml.is_empty());
        assert_eq!(ml.get_line(1)?, b"");
        Ok(())
    }

    #[test]
    fn test_delete_everything_from_large_tree() -> Result<()> {
        let mut ml = memory(1024);
        for i in 1..=800 {
            ml.append(i - 1, &text(i, 50))?;
        }
        ml.delete(801)?;
        assert_eq!(ml.line_count(), 800);
        ml.verify()?;

        // delete from the middle outwards
        while ml.line_count() > 1 {
            let lnum = (ml.line_count() + 1) / 2;
            ml.delete(lnum)?;
        }
        let remaining = ml.get_line(1)?.to_vec();
        assert!(remaining.starts_with(b"line "));
        ml.delete(1)?;
        assert!(ml.is_empty());
        assert_eq!(ml.get_line(1)?, b"");

        let stats = ml.verify()?;
        assert_eq!(stats.line_count, 1);
        assert_eq!(stats.data_blocks, 1);
        Ok(())
    }

    #[test]
    fn test_delete_keeps_neighbours() -> Result<()> {
        let mut ml = memory(1024);
        for i in 1..=120 {
            ml.append(i - 1, &text(i, 50))?;
        }
        for _ in 0..40 {
            ml.delete(30)?;
        }
        assert_eq!(ml.get_line(29)?, &text(29, 50)[..]);
        assert_eq!(ml.get_line(30)?, &text(70, 50)[..]);
        assert_eq!(ml.line_count(), 81);
        ml.verify()?;
        Ok(())
    }
}
