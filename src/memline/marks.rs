//! Line marks, used to find lines again after a global command shifted them.
//!
//! A mark is the top bit of the line's index entry, so it moves with the
//! line. `lowest_marked` bounds the scan: no line before it is marked.

use super::navigate::Intent;
use super::Memline;
use crate::error::Result;
use crate::types::LineNr;

impl Memline {
    /// Mark line `lnum`
    pub fn set_mark(&mut self, lnum: LineNr) -> Result<()> {
        self.check_lnum(lnum)?;
        if self.lowest_marked == 0 || self.lowest_marked > lnum {
            self.lowest_marked = lnum;
        }
        self.find_line(lnum, Intent::Find)?;
        let locked = self.locked_mut()?;
        let idx = lnum - locked.low;
        locked.block.set_mark(idx);
        locked.dirty = true;
        Ok(())
    }

    /// Check the mark of line `lnum`
    pub fn has_mark(&mut self, lnum: LineNr) -> Result<bool> {
        self.check_lnum(lnum)?;
        self.find_line(lnum, Intent::Find)?;
        let locked = self.locked_mut()?;
        Ok(locked.block.is_marked(lnum - locked.low))
    }

    /// Find the first marked line, clear its mark and return it
    pub fn first_marked(&mut self) -> Result<Option<LineNr>> {
        if self.lowest_marked == 0 {
            return Ok(None);
        }

        let mut lnum = self.lowest_marked;
        while lnum <= self.line_count {
            self.find_line(lnum, Intent::Find)?;
            let locked = self.locked_mut()?;
            let (low, high) = (locked.low, locked.high);
            let found = (lnum - low..=high - low).find(|&i| locked.block.is_marked(i));
            if let Some(i) = found {
                locked.block.clear_mark(i);
                locked.dirty = true;
                self.lowest_marked = low + i + 1;
                return Ok(Some(low + i));
            }
            lnum = high + 1;
        }

        self.lowest_marked = 0;
        Ok(None)
    }

    /// Clear all marks
    pub fn clear_all_marks(&mut self) -> Result<()> {
        if self.lowest_marked == 0 {
            return Ok(());
        }

        let mut lnum = self.lowest_marked;
        while lnum <= self.line_count {
            self.find_line(lnum, Intent::Find)?;
            let locked = self.locked_mut()?;
            let (low, high) = (locked.low, locked.high);
            for i in lnum - low..=high - low {
                if locked.block.clear_mark(i) {
                    locked.dirty = true;
                }
            }
            lnum = high + 1;
        }

        self.lowest_marked = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Result;
    use crate::memline::tests::{memory, text};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_marks_found_in_order() -> Result<()> {
        let mut ml = memory(1024);
        for i in 1..=100 {
            ml.append(i - 1, &text(i, 30))?;
        }
        ml.set_mark(10)?;
        ml.set_mark(50)?;
        ml.set_mark(90)?;

        assert_eq!(ml.first_marked()?, Some(10));
        assert!(!ml.has_mark(10)?);
        assert!(ml.has_mark(50)?);

        ml.delete(20)?;
        assert_eq!(ml.first_marked()?, Some(49));
        assert_eq!(ml.get_line(49)?, &text(50, 30)[..]);

        ml.append(0, b"new first")?;
        assert_eq!(ml.first_marked()?, Some(90));
        assert_eq!(ml.first_marked()?, None);
        Ok(())
    }

    #[test]
    fn test_marks_follow_block_splits() -> Result<()> {
        let mut ml = memory(1024);
        for i in 1..=40 {
            ml.append(i - 1, &text(i, 30))?;
        }
        ml.set_mark(20)?;
        for i in 0..60 {
            ml.append(10 + i, &text(1000 + i, 30))?;
        }
        assert_eq!(ml.first_marked()?, Some(80));
        assert_eq!(ml.get_line(80)?, &text(20, 30)[..]);
        Ok(())
    }

    #[test]
    fn test_clear_all_marks() -> Result<()> {
        let mut ml = memory(crate::PAGE_SIZE);
        for i in 1..=10 {
            ml.append(i - 1, &text(i, 10))?;
        }
        ml.set_mark(3)?;
        ml.set_mark(7)?;
        ml.clear_all_marks()?;
        assert!(!ml.has_mark(3)?);
        assert!(!ml.has_mark(7)?);
        assert_eq!(ml.first_marked()?, None);
        Ok(())
    }
}
