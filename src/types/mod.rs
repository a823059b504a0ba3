//! Common types used throughout the line store.

mod block_nr;
mod portable;

pub use block_nr::BlockNr;
pub use portable::{bytes_to_long, long_to_bytes};

/// A 1-based line number. Zero is used as "before the first line".
pub type LineNr = usize;

/// Default page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Smallest page size accepted; block 0 must fit in one page
pub const MIN_PAGE_SIZE: usize = 1024;

/// Largest page size accepted; data block offsets keep their top bit free
pub const MAX_PAGE_SIZE: usize = 1 << 20;

/// Default number of unlocked blocks kept in memory by a file-backed store
pub const DEFAULT_CACHE_BLOCKS: usize = 256;

/// Id tag of a data block ("da")
pub const DATA_ID: u16 = ((b'd' as u16) << 8) + b'a' as u16;

/// Id tag of a pointer block ("pt")
pub const PTR_ID: u16 = ((b'p' as u16) << 8) + b't' as u16;

/// Id tag of block 0
pub const BLOCK0_ID: [u8; 2] = [b'b', b'0'];

/// Check a page size against the supported range
pub fn valid_page_size(page_size: usize) -> bool {
    (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) && page_size % 4 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_ids() {
        assert_eq!(DATA_ID, 0x6461);
        assert_eq!(PTR_ID, 0x7074);
    }

    #[test]
    fn test_page_size_bounds() {
        assert!(valid_page_size(PAGE_SIZE));
        assert!(valid_page_size(MIN_PAGE_SIZE));
        assert!(!valid_page_size(512));
        assert!(!valid_page_size(1026));
        assert!(!valid_page_size(MAX_PAGE_SIZE * 2));
    }
}
