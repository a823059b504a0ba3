//! Block layer: the three kinds of swap file blocks.
//!
//! Every block starts with an id tag. Block 0 identifies the swap file,
//! pointer blocks are the branch nodes of the line tree and data blocks
//! hold the text. A raw block read from the store is turned into a typed
//! view by [`Block::decode`], which checks the id tag first; the tree
//! algorithms never look at untyped bytes.

mod block0;
mod data;
mod pointer;

pub(crate) use block0::file_stamp;
pub use block0::{Block0, BLOCK0_SIZE, B0_FNAME_SIZE, B0_HNAME_SIZE, B0_UNAME_SIZE, B0_VERSION_SIZE};
pub use data::{DataBlock, DB_INDEX_MASK, DB_MARKED, DATA_HEADER_SIZE, INDEX_SIZE};
pub use pointer::{
    PointerBlock, PointerEntry, PointerNode, RootPointerBlock, POINTER_ENTRY_SIZE,
    POINTER_HEADER_SIZE,
};

use crate::store::BlockHeader;
use crate::types::{BLOCK0_ID, DATA_ID, PTR_ID};

/// Raw bytes of a block: one or more pages
#[derive(Clone, PartialEq, Eq)]
pub struct BlockBuf {
    data: Vec<u8>,
}

impl BlockBuf {
    /// Create a zeroed buffer of `size` bytes
    pub fn zeroed(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
        }
    }

    /// Create a buffer from raw bytes
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Get a reference to the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the raw bytes
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Read a native-order u16 at `at`
    pub(crate) fn u16_at(&self, at: usize) -> u16 {
        u16::from_ne_bytes([self.data[at], self.data[at + 1]])
    }

    /// Write a native-order u16 at `at`
    pub(crate) fn set_u16(&mut self, at: usize, value: u16) {
        self.data[at..at + 2].copy_from_slice(&value.to_ne_bytes());
    }

    /// Read a native-order u32 at `at`
    pub(crate) fn u32_at(&self, at: usize) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.data[at..at + 4]);
        u32::from_ne_bytes(raw)
    }

    /// Write a native-order u32 at `at`
    pub(crate) fn set_u32(&mut self, at: usize, value: u32) {
        self.data[at..at + 4].copy_from_slice(&value.to_ne_bytes());
    }

    /// Read a native-order i32 at `at`
    pub(crate) fn i32_at(&self, at: usize) -> i32 {
        self.u32_at(at) as i32
    }

    /// Write a native-order i32 at `at`
    pub(crate) fn set_i32(&mut self, at: usize, value: i32) {
        self.set_u32(at, value as u32);
    }
}

impl std::fmt::Debug for BlockBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockBuf({} bytes)", self.data.len())
    }
}

impl std::ops::Deref for BlockBuf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl std::ops::DerefMut for BlockBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

/// A block read from the store, classified by its id tag
#[derive(Debug)]
pub enum Block {
    /// Block 0, the swap file identity
    Zero(BlockHeader),
    /// A pointer (branch) block
    Pointer(PointerBlock),
    /// A data (leaf) block
    Data(DataBlock),
    /// Unrecognised id or a header that cannot be valid
    Unknown(BlockHeader),
}

impl Block {
    /// Classify a raw block by its id tag.
    ///
    /// The header is never lost: blocks that fail validation come back as
    /// [`Block::Unknown`] so the caller can return them to the store.
    pub fn decode(header: BlockHeader) -> Block {
        let data = header.data();
        if data.len() < 2 {
            return Block::Unknown(header);
        }
        if data[0..2] == BLOCK0_ID {
            return Block::Zero(header);
        }
        match data.u16_at(0) {
            PTR_ID if PointerBlock::is_valid(data) => Block::Pointer(PointerBlock::from_header(header)),
            DATA_ID if DataBlock::is_valid(data) => Block::Data(DataBlock::from_header(header)),
            _ => Block::Unknown(header),
        }
    }

    /// Give the raw header back, e.g. to return it to the store
    pub fn into_header(self) -> BlockHeader {
        match self {
            Block::Zero(header) | Block::Unknown(header) => header,
            Block::Pointer(pb) => pb.into_header(),
            Block::Data(db) => db.into_header(),
        }
    }

    /// Short name of the block kind, for messages
    pub fn kind(&self) -> &'static str {
        match self {
            Block::Zero(_) => "block 0",
            Block::Pointer(_) => "pointer",
            Block::Data(_) => "data",
            Block::Unknown(_) => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockNr, PAGE_SIZE};

    fn header(nr: i64) -> BlockHeader {
        BlockHeader::new(BlockNr::new(nr), 1, BlockBuf::zeroed(PAGE_SIZE))
    }

    #[test]
    fn test_decode_by_id() {
        let data = DataBlock::init(header(2));
        assert!(matches!(Block::decode(data.into_header()), Block::Data(_)));

        let pointer = PointerBlock::init(header(1));
        assert!(matches!(Block::decode(pointer.into_header()), Block::Pointer(_)));

        let mut zero = header(0);
        Block0::new(PAGE_SIZE).write(zero.data_mut());
        assert!(matches!(Block::decode(zero), Block::Zero(_)));
    }

    #[test]
    fn test_decode_unknown_keeps_header() {
        let mut raw = header(5);
        raw.data_mut()[0..2].copy_from_slice(b"zz");
        match Block::decode(raw) {
            Block::Unknown(h) => assert_eq!(h.nr(), BlockNr::new(5)),
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[test]
    fn test_decode_rejects_impossible_pointer_count() {
        let mut pointer = PointerBlock::init(header(3));
        let max = pointer.count_max();
        let mut raw = pointer.into_header();
        raw.data_mut().set_u16(2, (max + 1) as u16);
        assert!(matches!(Block::decode(raw), Block::Unknown(_)));
        pointer = PointerBlock::init(header(3));
        assert_eq!(pointer.count(), 0);
    }
}
