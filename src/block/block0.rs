//! Block 0: swap file identity.
//!
//! Block 0 is written once when a memline is opened and is read back by
//! recovery to find the original file and to decide whether the swap file
//! can be used on this machine.

use crate::error::{MemlineError, Result};
use crate::types::{bytes_to_long, long_to_bytes, BLOCK0_ID};
use serde::Serialize;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Size of the version string field
pub const B0_VERSION_SIZE: usize = 10;
/// Size of the user name field
pub const B0_UNAME_SIZE: usize = 40;
/// Size of the host name field
pub const B0_HNAME_SIZE: usize = 40;
/// Size of the original file name field
pub const B0_FNAME_SIZE: usize = 900;

const OFF_VERSION: usize = 2;
const OFF_PAGE_SIZE: usize = OFF_VERSION + B0_VERSION_SIZE;
const OFF_MTIME: usize = OFF_PAGE_SIZE + 4;
const OFF_INO: usize = OFF_MTIME + 4;
const OFF_PID: usize = OFF_INO + 4;
const OFF_UNAME: usize = OFF_PID + 4;
const OFF_HNAME: usize = OFF_UNAME + B0_UNAME_SIZE;
const OFF_FNAME: usize = OFF_HNAME + B0_HNAME_SIZE;
const OFF_MAGIC_LONG: usize = OFF_FNAME + B0_FNAME_SIZE;
const OFF_MAGIC_INT: usize = OFF_MAGIC_LONG + 4;
const OFF_MAGIC_SHORT: usize = OFF_MAGIC_INT + 4;
const OFF_MAGIC_CHAR: usize = OFF_MAGIC_SHORT + 2;

/// Number of bytes of block 0 that carry information
pub const BLOCK0_SIZE: usize = OFF_MAGIC_CHAR + 1;

const MAGIC_LONG: u64 = 0x3031_3233;
const MAGIC_INT: u64 = 0x2021_2223;
const MAGIC_SHORT: u64 = 0x1011_1213;
const MAGIC_CHAR: u8 = 0x55;

/// Decoded contents of block 0
///
/// Layout:
/// ```text
/// Offset  Size  Description
/// 0       2     Id "b0"
/// 2       10    Version string
/// 12      4     Page size
/// 16      4     Modification time of the original file
/// 20      4     Inode of the original file
/// 24      4     Process id of the creator
/// 28      40    User name
/// 68      40    Host name
/// 108     900   Original file name
/// 1008    4     Magic long   0x30313233
/// 1012    4     Magic int    0x20212223
/// 1016    2     Magic short  0x10111213 (low half)
/// 1018    1     Magic char   0x55
/// ```
/// All integers are written least significant byte first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Block0 {
    /// Version string of the writer
    pub version: String,
    /// Page size of the swap file
    pub page_size: usize,
    /// Modification time of the original file (seconds since the epoch)
    pub mtime: u64,
    /// Inode number of the original file
    pub inode: u64,
    /// Process id of the writer
    pub pid: u32,
    /// User name of the writer
    pub user_name: String,
    /// Host name of the writer
    pub host_name: String,
    /// Original file name, empty when the buffer has no file
    pub file_name: String,
}

impl Block0 {
    /// Create block 0 for a new swap file owned by this process
    pub fn new(page_size: usize) -> Self {
        Self {
            version: format!("ML {}", env!("CARGO_PKG_VERSION")),
            page_size,
            mtime: 0,
            inode: 0,
            pid: std::process::id(),
            user_name: current_user(),
            host_name: current_host(),
            file_name: String::new(),
        }
    }

    /// Record the original file: its name, modification time and inode
    pub fn set_file(&mut self, path: Option<&Path>) {
        self.file_name = path
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (mtime, inode) = path.map(file_stamp).unwrap_or((0, 0));
        self.mtime = mtime;
        self.inode = inode;
    }

    /// Check the id tag
    pub fn is_block0(bytes: &[u8]) -> bool {
        bytes.len() >= BLOCK0_SIZE && bytes[0..2] == BLOCK0_ID
    }

    /// Check the four magic fields written by [`Block0::write`]
    pub fn magic_matches(bytes: &[u8]) -> bool {
        bytes.len() >= BLOCK0_SIZE
            && bytes_to_long(&bytes[OFF_MAGIC_LONG..OFF_MAGIC_INT]) == MAGIC_LONG & 0xffff_ffff
            && bytes_to_long(&bytes[OFF_MAGIC_INT..OFF_MAGIC_SHORT]) == MAGIC_INT & 0xffff_ffff
            && bytes_to_long(&bytes[OFF_MAGIC_SHORT..OFF_MAGIC_CHAR]) == MAGIC_SHORT & 0xffff
            && bytes[OFF_MAGIC_CHAR] == MAGIC_CHAR
    }

    /// Read block 0 from bytes
    pub fn read(bytes: &[u8]) -> Result<Self> {
        if !Self::is_block0(bytes) {
            return Err(MemlineError::corruption("block 0 id wrong"));
        }

        Ok(Self {
            version: read_str(&bytes[OFF_VERSION..OFF_PAGE_SIZE]),
            page_size: bytes_to_long(&bytes[OFF_PAGE_SIZE..OFF_MTIME]) as usize,
            mtime: bytes_to_long(&bytes[OFF_MTIME..OFF_INO]),
            inode: bytes_to_long(&bytes[OFF_INO..OFF_PID]),
            pid: bytes_to_long(&bytes[OFF_PID..OFF_UNAME]) as u32,
            user_name: read_str(&bytes[OFF_UNAME..OFF_HNAME]),
            host_name: read_str(&bytes[OFF_HNAME..OFF_FNAME]),
            file_name: read_str(&bytes[OFF_FNAME..OFF_MAGIC_LONG]),
        })
    }

    /// Write block 0 into the start of `bytes`
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[..BLOCK0_SIZE].fill(0);
        bytes[0..2].copy_from_slice(&BLOCK0_ID);

        write_str(&mut bytes[OFF_VERSION..OFF_PAGE_SIZE], &self.version);
        long_to_bytes(self.page_size as u64, &mut bytes[OFF_PAGE_SIZE..OFF_MTIME]);
        long_to_bytes(self.mtime, &mut bytes[OFF_MTIME..OFF_INO]);
        long_to_bytes(self.inode, &mut bytes[OFF_INO..OFF_PID]);
        long_to_bytes(self.pid as u64, &mut bytes[OFF_PID..OFF_UNAME]);
        write_str(&mut bytes[OFF_UNAME..OFF_HNAME], &self.user_name);
        write_str(&mut bytes[OFF_HNAME..OFF_FNAME], &self.host_name);
        write_str(&mut bytes[OFF_FNAME..OFF_MAGIC_LONG], &self.file_name);

        long_to_bytes(MAGIC_LONG, &mut bytes[OFF_MAGIC_LONG..OFF_MAGIC_INT]);
        long_to_bytes(MAGIC_INT, &mut bytes[OFF_MAGIC_INT..OFF_MAGIC_SHORT]);
        long_to_bytes(MAGIC_SHORT, &mut bytes[OFF_MAGIC_SHORT..OFF_MAGIC_CHAR]);
        bytes[OFF_MAGIC_CHAR] = MAGIC_CHAR;
    }
}

/// Modification time (seconds) and inode of a file, zero when unavailable
pub(crate) fn file_stamp(path: &Path) -> (u64, u64) {
    let Ok(meta) = std::fs::metadata(path) else {
        return (0, 0);
    };
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    #[cfg(unix)]
    let inode = {
        use std::os::unix::fs::MetadataExt;
        meta.ino()
    };
    #[cfg(not(unix))]
    let inode = 0;

    (mtime, inode)
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_default()
}

fn current_host() -> String {
    if let Ok(host) = std::env::var("HOSTNAME") {
        return host;
    }
    std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Copy a string into a NUL-terminated fixed field, truncating if needed
fn write_str(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len() - 1);
    field[..len].copy_from_slice(&bytes[..len]);
    field[len..].fill(0);
}

fn read_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PAGE_SIZE;

    #[test]
    fn test_field_offsets() {
        assert_eq!(OFF_FNAME, 108);
        assert_eq!(OFF_MAGIC_LONG, 1008);
        assert!(BLOCK0_SIZE <= crate::types::MIN_PAGE_SIZE);
    }

    #[test]
    fn test_block0_roundtrip() -> Result<()> {
        let mut b0 = Block0::new(PAGE_SIZE);
        b0.file_name = "/tmp/notes.txt".to_string();
        b0.mtime = 1_700_000_000;
        b0.inode = 4242;

        let mut bytes = vec![0u8; PAGE_SIZE];
        b0.write(&mut bytes);

        assert!(Block0::magic_matches(&bytes));
        assert_eq!(Block0::read(&bytes)?, b0);
        // explicit byte order, independent of the host
        assert_eq!(&bytes[OFF_PAGE_SIZE..OFF_MTIME], &[0x00, 0x10, 0x00, 0x00]);
        Ok(())
    }

    #[test]
    fn test_invalid_id() {
        let bytes = vec![0u8; PAGE_SIZE];
        assert!(Block0::read(&bytes).is_err());
    }

    #[test]
    fn test_magic_mismatch() {
        let mut bytes = vec![0u8; PAGE_SIZE];
        Block0::new(PAGE_SIZE).write(&mut bytes);
        bytes[OFF_MAGIC_CHAR] ^= 0xff;
        assert!(!Block0::magic_matches(&bytes));
        assert!(Block0::read(&bytes).is_ok());
    }

    #[test]
    fn test_long_file_name_truncated() -> Result<()> {
        let mut b0 = Block0::new(PAGE_SIZE);
        b0.file_name = "x".repeat(2000);
        let mut bytes = vec![0u8; PAGE_SIZE];
        b0.write(&mut bytes);
        assert_eq!(Block0::read(&bytes)?.file_name.len(), B0_FNAME_SIZE - 1);
        assert!(Block0::magic_matches(&bytes));
        Ok(())
    }
}
