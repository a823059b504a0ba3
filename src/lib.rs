//! # Memline
//!
//! A crash-recoverable line store for text buffers: the lines of a buffer
//! live in a tree of fixed-size blocks that is mirrored to a swap file.
//!
//! ## Architecture
//!
//! The engine is composed of layered components:
//!
//! - **Block Layer** (`block`): block 0, pointer blocks and data blocks
//! - **Block Store** (`store`): paged block cache over the swap file, with
//!   negative numbers for blocks that still match the original file
//! - **Memline** (`memline`): line tree navigation, insert/delete/replace,
//!   marks and sync
//! - **Recovery** (`recover`): rebuilds a buffer from a swap file
//!
//! ## Usage
//!
//! ```rust,ignore
//! use memline::{Config, Memline};
//!
//! let mut ml = Memline::open(&Config::new("notes.txt.swp").original("notes.txt"))?;
//! ml.load_file("notes.txt".as_ref())?;
//!
//! ml.append(0, b"first line")?;
//! ml.replace(2, b"changed")?;
//! ml.delete(3)?;
//! println!("{}", ml.line_string(1)?);
//!
//! // make the changes recoverable
//! ml.sync(true)?;
//!
//! // after a crash
//! let recovery = memline::recover("notes.txt.swp".as_ref(), &Default::default())?;
//! ```

pub mod block;
pub mod error;
pub mod memline;
pub mod original;
pub mod recover;
pub mod registry;
pub mod store;
pub mod types;

pub use error::{MemlineError, Result};
pub use types::{BlockNr, LineNr, PAGE_SIZE};

// Re-export main public API
pub use memline::{Memline, MemlineStats, TreeNode, TreeStats};
pub use recover::{recover, swap_info, RecoverOptions, Recovery, RecoveryStatus, SwapInfo};
pub use registry::MemlineSet;
pub use store::{BlockStore, MemFile};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Memline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Path of the swap file; `None` keeps everything in memory
    pub swap_path: Option<PathBuf>,
    /// Page size in bytes (default: 4096)
    pub page_size: usize,
    /// Unlocked blocks kept in memory before writing them out (default: 256)
    pub cache_blocks: usize,
    /// Original file recorded in block 0
    pub original: Option<PathBuf>,
    /// Flush the swap file to stable storage on sync (default: false)
    pub fsync: bool,
    /// Raised to stop long syncs and recovery early
    #[serde(skip)]
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            swap_path: None,
            page_size: PAGE_SIZE,
            cache_blocks: types::DEFAULT_CACHE_BLOCKS,
            original: None,
            fsync: false,
            interrupt: None,
        }
    }
}

impl Config {
    /// Create a new configuration with a swap file
    pub fn new<P: Into<PathBuf>>(swap_path: P) -> Self {
        Self {
            swap_path: Some(swap_path.into()),
            ..Self::default()
        }
    }

    /// Configuration without a swap file
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set page size
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the number of cached blocks
    pub fn cache_blocks(mut self, blocks: usize) -> Self {
        self.cache_blocks = blocks;
        self
    }

    /// Set the original file
    pub fn original<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.original = Some(path.into());
        self
    }

    /// Enable fsync on sync for durability
    pub fn fsync(mut self, enabled: bool) -> Self {
        self.fsync = enabled;
        self
    }

    /// Set the interrupt flag
    pub fn interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::fs;
    use tempfile::tempdir;

    fn random_line(rng: &mut StdRng) -> Vec<u8> {
        let len = match rng.gen_range(0..10) {
            0 => 0,
            1 => rng.gen_range(200..1500),
            _ => rng.gen_range(1..80),
        };
        (0..len).map(|_| rng.gen_range(b'a'..=b'z')).collect()
    }

    /// Apply random edits to a memline and a plain vector and compare
    fn random_edits(config: &Config, seed: u64, steps: usize) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut ml = Memline::open(config)?;
        let mut model: Vec<Vec<u8>> = vec![Vec::new()];

        for step in 0..steps {
            match rng.gen_range(0..10) {
                0..=4 => {
                    let after = rng.gen_range(0..=model.len());
                    let line = random_line(&mut rng);
                    ml.append(after, &line)?;
                    model.insert(after, line);
                }
                5..=6 => {
                    let lnum = rng.gen_range(1..=model.len());
                    ml.delete(lnum)?;
                    if model.len() == 1 {
                        model[0].clear();
                    } else {
                        model.remove(lnum - 1);
                    }
                }
                7..=8 => {
                    let lnum = rng.gen_range(1..=model.len());
                    let line = random_line(&mut rng);
                    ml.replace(lnum, &line)?;
                    model[lnum - 1] = line;
                }
                _ => {
                    let lnum = rng.gen_range(1..=model.len());
                    assert_eq!(ml.get_line(lnum)?, &model[lnum - 1][..], "step {}", step);
                }
            }
            assert_eq!(ml.line_count(), model.len());
            assert!(ml.locked_block_count() <= 1);

            if step % 50 == 0 {
                let stats = ml.verify()?;
                assert_eq!(stats.line_count, model.len());
            }
        }

        assert_eq!(ml.to_lines()?, model);
        ml.verify()?;
        ml.close(true)
    }

    #[test]
    fn test_random_edits_in_memory() -> Result<()> {
        for seed in 0..4 {
            random_edits(&Config::memory().page_size(1024), seed, 1500)?;
        }
        Ok(())
    }

    #[test]
    fn test_random_edits_with_swap() -> Result<()> {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("rand.swp"))
            .page_size(1024)
            .cache_blocks(8);
        random_edits(&config, 42, 1500)
    }

    #[test]
    fn test_flush_is_idempotent() -> Result<()> {
        let mut ml = Memline::open(&Config::memory())?;
        ml.append(1, b"one")?;
        ml.replace(2, b"uno")?;
        ml.flush()?;
        let first = ml.export_tree()?;
        ml.flush()?;
        let second = ml.export_tree()?;
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(ml.to_lines()?, vec![b"".to_vec(), b"uno".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_sync_then_recover_after_edits() -> Result<()> {
        let dir = tempdir().unwrap();
        let orig = dir.path().join("doc.txt");
        let lines: Vec<String> = (1..=500).map(|i| format!("original line {}", i)).collect();
        fs::write(&orig, lines.join("\n") + "\n")?;

        let swap = dir.path().join("doc.txt.swp");
        let mut ml = Memline::open(&Config::new(&swap).page_size(1024))?;
        ml.load_file(&orig)?;
        ml.replace(250, b"edited in the middle")?;
        ml.delete(10)?;
        ml.append(400, b"inserted")?;
        ml.sync(true)?;
        let expected = ml.to_lines()?;
        drop(ml);

        let mut recovery = recover(&swap, &RecoverOptions::default())?;
        assert_eq!(recovery.status, RecoveryStatus::Clean);
        assert_eq!(recovery.memline.to_lines()?, expected);
        Ok(())
    }

    #[test]
    fn test_config_serde() {
        let config = Config::new("/tmp/x.swp").page_size(2048).fsync(true);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"pageSize\":2048"));
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.page_size, 2048);
        assert!(back.fsync);
        assert_eq!(back.cache_blocks, types::DEFAULT_CACHE_BLOCKS);

        let partial: Config = serde_json::from_str("{\"swapPath\":\"a.swp\"}").unwrap();
        assert_eq!(partial.page_size, PAGE_SIZE);
    }

    #[test]
    fn test_unsupported_page_size() {
        let err = Memline::open(&Config::memory().page_size(1000)).unwrap_err();
        assert!(matches!(err, MemlineError::UnsupportedPageSize(1000)));
    }
}
