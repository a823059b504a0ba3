//! Data blocks: the leaves of the line tree.
//!
//! A data block uses the following layout:
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │ id "da" │ pad │ free │ txt_start │ txt_end │ lines │  20 bytes
//! ├────────────────────────────────────────────────────┤
//! │                    Line Index                       │
//! │  [idx0][idx1][idx2]...      →                       │
//! ├────────────────────────────────────────────────────┤
//! │                                                    │
//! │                   Free Space                        │
//! │                                                    │
//! ├────────────────────────────────────────────────────┤  txt_start
//! │                    Line Text                        │
//! │      ←  [line2\0][line1\0][line0\0]                 │
//! └────────────────────────────────────────────────────┘  txt_end
//! ```
//!
//! Index entry `i` holds the offset of line `i`; the text of line `i` runs
//! up to the start of line `i - 1` (or `txt_end` for line 0) and is NUL
//! terminated. The top bit of an index entry is the mark flag.
//! `free == txt_start - DATA_HEADER_SIZE - line_count * INDEX_SIZE` always.

use crate::block::BlockBuf;
use crate::store::BlockHeader;
use crate::types::{BlockNr, DATA_ID};

/// Size of the fixed data block header
pub const DATA_HEADER_SIZE: usize = 20;

/// Size of one line index entry
pub const INDEX_SIZE: usize = 4;

/// Mark flag in a line index entry
pub const DB_MARKED: u32 = 1 << 31;

/// Offset bits of a line index entry
pub const DB_INDEX_MASK: u32 = !DB_MARKED;

const OFF_FREE: usize = 4;
const OFF_TXT_START: usize = 8;
const OFF_TXT_END: usize = 12;
const OFF_LINE_COUNT: usize = 16;

/// Move the offset part of an index entry, keeping its mark
fn shift_index(raw: u32, delta: isize) -> u32 {
    let offset = ((raw & DB_INDEX_MASK) as isize + delta) as u32;
    (raw & DB_MARKED) | (offset & DB_INDEX_MASK)
}

/// A data block with typed access to its lines
#[derive(Debug)]
pub struct DataBlock {
    header: BlockHeader,
}

impl DataBlock {
    /// Format a freshly allocated block as an empty data block
    pub fn init(mut header: BlockHeader) -> Self {
        let data = header.data_mut();
        let size = data.len();
        data.fill(0);
        data.set_u16(0, DATA_ID);
        let mut block = Self { header };
        block.set_txt_start(size);
        block.set_txt_end(size);
        block.set_free(size - DATA_HEADER_SIZE);
        block.set_line_count(0);
        block
    }

    pub(crate) fn from_header(header: BlockHeader) -> Self {
        Self { header }
    }

    /// Check that the index array fits in the block
    pub(crate) fn is_valid(data: &BlockBuf) -> bool {
        data.len() >= DATA_HEADER_SIZE
            && (data.u32_at(OFF_LINE_COUNT) as usize)
                .checked_mul(INDEX_SIZE)
                .map_or(false, |n| DATA_HEADER_SIZE + n <= data.len())
    }

    /// Block number of this block
    pub fn nr(&self) -> BlockNr {
        self.header.nr()
    }

    /// Number of pages of this block
    pub fn page_count(&self) -> usize {
        self.header.page_count()
    }

    /// Size of the block in bytes
    pub fn size(&self) -> usize {
        self.header.data().len()
    }

    /// Free bytes between the index and the text
    pub fn free(&self) -> usize {
        self.header.data().u32_at(OFF_FREE) as usize
    }

    /// Offset of the lowest text byte
    pub fn txt_start(&self) -> usize {
        self.header.data().u32_at(OFF_TXT_START) as usize
    }

    /// End of the text area
    pub fn txt_end(&self) -> usize {
        self.header.data().u32_at(OFF_TXT_END) as usize
    }

    /// Number of lines in the block
    pub fn line_count(&self) -> usize {
        self.header.data().u32_at(OFF_LINE_COUNT) as usize
    }

    fn set_free(&mut self, v: usize) {
        self.header.data_mut().set_u32(OFF_FREE, v as u32);
    }

    fn set_txt_start(&mut self, v: usize) {
        self.header.data_mut().set_u32(OFF_TXT_START, v as u32);
    }

    fn set_txt_end(&mut self, v: usize) {
        self.header.data_mut().set_u32(OFF_TXT_END, v as u32);
    }

    fn set_line_count(&mut self, v: usize) {
        self.header.data_mut().set_u32(OFF_LINE_COUNT, v as u32);
    }

    /// Raw index entry `i`, including the mark flag
    pub fn raw_index(&self, i: usize) -> u32 {
        self.header.data().u32_at(DATA_HEADER_SIZE + i * INDEX_SIZE)
    }

    fn set_raw_index(&mut self, i: usize, raw: u32) {
        self.header.data_mut().set_u32(DATA_HEADER_SIZE + i * INDEX_SIZE, raw);
    }

    /// Offset of the text of line `i`
    pub fn offset(&self, i: usize) -> usize {
        (self.raw_index(i) & DB_INDEX_MASK) as usize
    }

    /// First byte after the text of line `i`
    fn line_end(&self, i: usize) -> usize {
        if i == 0 {
            self.txt_end()
        } else {
            self.offset(i - 1)
        }
    }

    /// Bytes used by line `i`, including its NUL
    pub fn line_size(&self, i: usize) -> usize {
        self.line_end(i).saturating_sub(self.offset(i))
    }

    /// Text of line `i` without its NUL
    pub fn line(&self, i: usize) -> &[u8] {
        let data = self.header.data();
        let start = self.offset(i);
        let end = self.line_end(i).min(data.len());
        if start >= end {
            return &[];
        }
        let text = &data[start..end];
        let len = text.iter().position(|&b| b == 0).unwrap_or(text.len());
        &text[..len]
    }

    /// Text of line `i` for recovery: read from its offset up to the first
    /// NUL before `txt_end`. `None` if the offset points outside the text.
    pub fn salvage_line(&self, i: usize, txt_end: usize) -> Option<&[u8]> {
        let data = self.header.data();
        let start = self.offset(i);
        let end = txt_end.min(data.len());
        if start <= DATA_HEADER_SIZE || start >= end {
            return None;
        }
        let text = &data[start..end];
        let len = text.iter().position(|&b| b == 0).unwrap_or(text.len());
        Some(&text[..len])
    }

    /// Check the header fields against each other and the block size
    pub fn header_consistent(&self) -> bool {
        let index_end = self
            .line_count()
            .checked_mul(INDEX_SIZE)
            .and_then(|n| n.checked_add(DATA_HEADER_SIZE));
        matches!(index_end, Some(end) if end + self.free() == self.txt_start())
            && self.txt_start() <= self.txt_end()
            && self.txt_end() <= self.size()
    }

    /// Full consistency check of header, index and text
    pub fn check(&self) -> std::result::Result<(), String> {
        if !self.header_consistent() {
            return Err(format!(
                "header inconsistent: free {} txt_start {} txt_end {} lines {}",
                self.free(),
                self.txt_start(),
                self.txt_end(),
                self.line_count()
            ));
        }
        let data = self.header.data();
        for i in 0..self.line_count() {
            let start = self.offset(i);
            let end = self.line_end(i);
            if start < self.txt_start() || start >= end || end > self.txt_end() {
                return Err(format!("line {} has bad offset {}", i, start));
            }
            if data[end - 1] != 0 {
                return Err(format!("line {} is not terminated", i));
            }
        }
        Ok(())
    }

    /// Insert `text` as line `pos`, shifting lines `pos..` one index up.
    ///
    /// The caller must have checked that `text.len() + 1 + INDEX_SIZE`
    /// bytes are free.
    pub fn insert_line(&mut self, pos: usize, text: &[u8]) {
        let len = text.len() + 1;
        let count = self.line_count();
        debug_assert!(pos <= count && self.free() >= len + INDEX_SIZE);

        let txt_start = self.txt_start() - len;
        let free = self.free() - len - INDEX_SIZE;
        self.set_txt_start(txt_start);
        self.set_free(free);

        let at = if pos < count {
            // text of the following lines moves down into the free space
            let end = self.line_end(pos);
            self.header
                .data_mut()
                .copy_within(txt_start + len..end, txt_start);
            for i in (pos..count).rev() {
                let raw = self.raw_index(i);
                self.set_raw_index(i + 1, shift_index(raw, -(len as isize)));
            }
            end - len
        } else {
            txt_start
        };

        self.set_raw_index(pos, at as u32);
        let data = self.header.data_mut();
        data[at..at + text.len()].copy_from_slice(text);
        data[at + text.len()] = 0;
        self.set_line_count(count + 1);
    }

    /// Append `text` after the last line
    pub fn push_line(&mut self, text: &[u8]) {
        let count = self.line_count();
        self.insert_line(count, text);
    }

    /// Remove line `idx`, closing the gap in text and index
    pub fn delete_line(&mut self, idx: usize) {
        let count = self.line_count();
        debug_assert!(idx < count);

        let txt_start = self.txt_start();
        let start = self.offset(idx);
        let size = self.line_size(idx);

        self.header
            .data_mut()
            .copy_within(txt_start..start, txt_start + size);
        for i in idx..count - 1 {
            let raw = self.raw_index(i + 1);
            self.set_raw_index(i, shift_index(raw, size as isize));
        }

        self.set_free(self.free() + size + INDEX_SIZE);
        self.set_txt_start(txt_start + size);
        self.set_line_count(count - 1);
    }

    /// Replace the text of line `idx` in place.
    ///
    /// Returns `false`, leaving the block untouched, when the new text
    /// does not fit in the free space.
    pub fn replace_line(&mut self, idx: usize, text: &[u8]) -> bool {
        let new_len = text.len() + 1;
        let start = self.offset(idx);
        let old_len = self.line_size(idx);
        let extra = new_len as isize - old_len as isize;
        if extra > self.free() as isize {
            return false;
        }

        let count = self.line_count();
        let txt_start = self.txt_start();
        let new_txt_start = (txt_start as isize - extra) as usize;
        if extra != 0 {
            self.header
                .data_mut()
                .copy_within(txt_start..start, new_txt_start);
            for i in idx + 1..count {
                let raw = self.raw_index(i);
                self.set_raw_index(i, shift_index(raw, -extra));
            }
        }

        let raw = self.raw_index(idx);
        self.set_raw_index(idx, shift_index(raw, -extra));
        self.set_free((self.free() as isize - extra) as usize);
        self.set_txt_start(new_txt_start);

        let at = (start as isize - extra) as usize;
        let data = self.header.data_mut();
        data[at..at + text.len()].copy_from_slice(text);
        data[at + text.len()] = 0;
        true
    }

    /// Text bytes used by lines `from..line_count`
    pub fn tail_size(&self, from: usize) -> usize {
        self.line_end(from) - self.txt_start()
    }

    /// Move lines `from..line_count` to the end of `to`, keeping marks.
    ///
    /// The caller must have checked that `to` has room for them.
    pub fn move_tail(&mut self, from: usize, to: &mut DataBlock) {
        let count = self.line_count();
        if from >= count {
            return;
        }
        let moved = count - from;
        let data_moved = self.tail_size(from);
        let src_start = self.txt_start();
        let dst_start = to.txt_start() - data_moved;
        debug_assert!(to.free() >= data_moved + moved * INDEX_SIZE);

        to.header.data_mut()[dst_start..dst_start + data_moved]
            .copy_from_slice(&self.header.data()[src_start..src_start + data_moved]);

        let delta = dst_start as isize - src_start as isize;
        let to_count = to.line_count();
        for k in 0..moved {
            let raw = self.raw_index(from + k);
            to.set_raw_index(to_count + k, shift_index(raw, delta));
        }
        to.set_txt_start(dst_start);
        to.set_free(to.free() - data_moved - moved * INDEX_SIZE);
        to.set_line_count(to_count + moved);

        self.set_txt_start(src_start + data_moved);
        self.set_free(self.free() + data_moved + moved * INDEX_SIZE);
        self.set_line_count(from);
    }

    /// Check the mark flag of line `i`
    pub fn is_marked(&self, i: usize) -> bool {
        self.raw_index(i) & DB_MARKED != 0
    }

    /// Set the mark flag of line `i`
    pub fn set_mark(&mut self, i: usize) {
        let raw = self.raw_index(i);
        self.set_raw_index(i, raw | DB_MARKED);
    }

    /// Clear the mark flag of line `i`, returning whether it was set
    pub fn clear_mark(&mut self, i: usize) -> bool {
        let raw = self.raw_index(i);
        self.set_raw_index(i, raw & DB_INDEX_MASK);
        raw & DB_MARKED != 0
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PAGE_SIZE;

    fn block(size: usize) -> DataBlock {
        DataBlock::init(BlockHeader::new(BlockNr::new(2), 1, BlockBuf::zeroed(size)))
    }

    fn lines(db: &DataBlock) -> Vec<Vec<u8>> {
        (0..db.line_count()).map(|i| db.line(i).to_vec()).collect()
    }

    #[test]
    fn test_new_block_is_empty() {
        let db = block(PAGE_SIZE);
        assert_eq!(db.line_count(), 0);
        assert_eq!(db.txt_start(), PAGE_SIZE);
        assert_eq!(db.txt_end(), PAGE_SIZE);
        assert_eq!(db.free(), PAGE_SIZE - DATA_HEADER_SIZE);
        assert!(db.check().is_ok());
    }

    #[test]
    fn test_insert_front_middle_end() {
        let mut db = block(PAGE_SIZE);
        db.push_line(b"two");
        db.insert_line(0, b"one");
        db.push_line(b"four");
        db.insert_line(2, b"three");

        assert_eq!(lines(&db), vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec(), b"four".to_vec()]);
        // index 0 is physically last
        assert!(db.offset(0) > db.offset(1));
        assert!(db.check().is_ok());
    }

    #[test]
    fn test_delete_line() {
        let mut db = block(PAGE_SIZE);
        for text in [&b"a"[..], b"bb", b"ccc", b"dddd"] {
            db.push_line(text);
        }
        let free = db.free();
        db.delete_line(1);
        assert_eq!(lines(&db), vec![b"a".to_vec(), b"ccc".to_vec(), b"dddd".to_vec()]);
        assert_eq!(db.free(), free + 3 + INDEX_SIZE);
        assert!(db.check().is_ok());
    }

    #[test]
    fn test_replace_grow_and_shrink() {
        let mut db = block(PAGE_SIZE);
        for text in [&b"first"[..], b"second", b"third"] {
            db.push_line(text);
        }
        assert!(db.replace_line(1, b"a much longer second line"));
        assert!(db.replace_line(0, b"1"));
        assert_eq!(
            lines(&db),
            vec![b"1".to_vec(), b"a much longer second line".to_vec(), b"third".to_vec()]
        );
        assert!(db.check().is_ok());
    }

    #[test]
    fn test_replace_that_does_not_fit() {
        let mut db = block(64);
        db.push_line(b"x");
        let before = lines(&db);
        assert!(!db.replace_line(0, &[b'y'; 60]));
        assert_eq!(lines(&db), before);
    }

    #[test]
    fn test_marks_follow_lines() {
        let mut db = block(PAGE_SIZE);
        for text in [&b"a"[..], b"b", b"c"] {
            db.push_line(text);
        }
        db.set_mark(1);
        db.insert_line(0, b"new");
        assert!(db.is_marked(2));
        assert_eq!(db.line(2), b"b");
        db.delete_line(0);
        assert!(db.is_marked(1));
        assert!(db.clear_mark(1));
        assert!(!db.is_marked(1));
    }

    #[test]
    fn test_move_tail() {
        let mut left = block(PAGE_SIZE);
        let mut right = block(PAGE_SIZE);
        for text in [&b"l0"[..], b"l1", b"l2", b"l3"] {
            left.push_line(text);
        }
        right.push_line(b"new");
        left.set_mark(3);

        let size = left.tail_size(2);
        assert_eq!(size, 6);
        left.move_tail(2, &mut right);

        assert_eq!(lines(&left), vec![b"l0".to_vec(), b"l1".to_vec()]);
        assert_eq!(lines(&right), vec![b"new".to_vec(), b"l2".to_vec(), b"l3".to_vec()]);
        assert!(right.is_marked(2));
        assert!(left.check().is_ok());
        assert!(right.check().is_ok());
    }

    #[test]
    fn test_salvage_rejects_bad_offset() {
        let mut db = block(PAGE_SIZE);
        db.push_line(b"ok");
        assert_eq!(db.salvage_line(0, db.txt_end()), Some(&b"ok"[..]));
        db.set_raw_index(0, 3);
        assert_eq!(db.salvage_line(0, db.txt_end()), None);
    }
}
