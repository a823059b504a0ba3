//! Rebuilding a buffer from a swap file after a crash.
//!
//! The tree is walked depth first from block 1. Data blocks are copied
//! line by line; blocks that were never written (negative numbers) are
//! taken from the original file. Damage does not stop the walk: every
//! problem adds a line starting with `???` to the recovered text and
//! counts as an error. Only an unusable block 0 or block 1 is fatal.

use crate::block::{file_stamp, Block, Block0, BLOCK0_SIZE};
use crate::error::{MemlineError, Result};
use crate::memline::Memline;
use crate::original::OriginalText;
use crate::store::{BlockStore, MemFile};
use crate::types::{BlockNr, LineNr, PAGE_SIZE};
use crate::Config;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MANY_LINES_MISSING: &str = "???MANY LINES MISSING";
pub const LINE_COUNT_WRONG: &str = "???LINE COUNT WRONG";
pub const EMPTY_BLOCK: &str = "???EMPTY BLOCK";
pub const LINES_MISSING: &str = "???LINES MISSING";
pub const BLOCK_MISSING: &str = "???BLOCK MISSING";
pub const MAYBE_MESSED_UP: &str = "??? from here until ???END lines may be messed up";
pub const MAYBE_INSERTED_DELETED: &str = "??? from here until ???END lines may have been inserted/deleted";
pub const BAD_LINE: &str = "???";
pub const SUSPECT_END: &str = "???END";

/// Options for [`recover`]
#[derive(Debug, Clone, Default)]
pub struct RecoverOptions {
    /// Original file; defaults to the name recorded in block 0
    pub original: Option<PathBuf>,
    /// Page size to assume before block 0 is read; defaults to 4096
    pub page_size: Option<usize>,
    /// Stops the walk when raised
    pub interrupt: Option<Arc<AtomicBool>>,
    /// Configuration of the memline that receives the lines
    pub config: Config,
}

/// How the recovery ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryStatus {
    /// No problems found
    Clean,
    /// Finished; the count of `???` problems
    CompletedWithErrors(usize),
    /// Stopped early; the lines so far are kept
    Interrupted,
}

/// Result of a recovery
#[derive(Debug)]
pub struct Recovery {
    /// The rebuilt buffer
    pub memline: Memline,
    pub errors: usize,
    pub status: RecoveryStatus,
    /// The original file was modified after the swap file recorded it
    pub original_changed: bool,
    /// Block 0 as found in the swap file
    pub block0: Block0,
}

/// Block 0 of a swap file, for listing swap files
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapInfo {
    pub path: PathBuf,
    #[serde(flatten)]
    pub block0: Block0,
    /// The writing process still exists
    pub process_running: bool,
    /// Written by a compatible build
    pub magic_ok: bool,
}

/// Read block 0 of a swap file
pub fn swap_info(path: &Path) -> Result<SwapInfo> {
    let mut bytes = vec![0u8; BLOCK0_SIZE];
    File::open(path)?
        .read_exact(&mut bytes)
        .map_err(|_| MemlineError::NotASwapFile(path.to_path_buf()))?;
    if !Block0::is_block0(&bytes) {
        return Err(MemlineError::NotASwapFile(path.to_path_buf()));
    }
    let block0 = Block0::read(&bytes)?;
    Ok(SwapInfo {
        path: path.to_path_buf(),
        process_running: process_running(block0.pid),
        magic_ok: Block0::magic_matches(&bytes),
        block0,
    })
}

fn process_running(pid: u32) -> bool {
    pid != 0 && Path::new("/proc").join(pid.to_string()).exists()
}

/// Lines recovered so far
struct Output {
    memline: Memline,
    lnum: LineNr,
    errors: usize,
}

impl Output {
    fn line(&mut self, text: &[u8]) -> Result<()> {
        self.memline.append(self.lnum, text)?;
        self.lnum += 1;
        Ok(())
    }

    fn problem(&mut self, placeholder: &str) -> Result<()> {
        self.errors += 1;
        debug!(lnum = self.lnum + 1, placeholder, "recovery problem");
        self.line(placeholder.as_bytes())
    }
}

/// Rebuild the buffer stored in `swap_path`
pub fn recover(swap_path: &Path, options: &RecoverOptions) -> Result<Recovery> {
    let mut store = MemFile::open_existing(swap_path, options.page_size.unwrap_or(PAGE_SIZE))?;

    let header = store
        .get(BlockNr::ZERO, 1)
        .map_err(|_| MemlineError::NotASwapFile(swap_path.to_path_buf()))?;
    let bytes = header.data().as_bytes();
    if !Block0::is_block0(bytes) {
        return Err(MemlineError::NotASwapFile(swap_path.to_path_buf()));
    }
    if !Block0::magic_matches(bytes) {
        return Err(MemlineError::MagicMismatch(swap_path.to_path_buf()));
    }
    let block0 = Block0::read(bytes)?;
    store.put(header, false, false);

    if block0.page_size != store.page_size() {
        debug!(page_size = block0.page_size, "swap file uses a different page size");
        store.set_page_size(block0.page_size)?;
    }

    let original_path = options
        .original
        .clone()
        .or_else(|| (!block0.file_name.is_empty()).then(|| PathBuf::from(&block0.file_name)));
    let original_changed = original_path
        .as_deref()
        .map_or(false, |orig| original_changed(orig, swap_path));
    if original_changed {
        warn!(original = ?original_path, "original file may have been changed");
    }
    info!(swap = %swap_path.display(), original = ?original_path, "recovering");

    let mut out = Output {
        memline: Memline::open(&options.config)?,
        lnum: 0,
        errors: 0,
    };
    let mut original = original_path.map(OriginalText::new);
    let interrupted = walk(&mut store, &mut out, original.as_mut(), options.interrupt.as_deref())?;
    Box::new(store).close(false)?;

    // the placeholder line of the fresh memline is now the last one
    let last = out.memline.line_count();
    out.memline.delete(last)?;

    let status = if interrupted {
        RecoveryStatus::Interrupted
    } else if out.errors > 0 {
        RecoveryStatus::CompletedWithErrors(out.errors)
    } else {
        RecoveryStatus::Clean
    };
    info!(lines = out.memline.line_count(), errors = out.errors, ?status, "recovery finished");

    Ok(Recovery {
        memline: out.memline,
        errors: out.errors,
        status,
        original_changed,
        block0,
    })
}

/// The original was written after the swap file
fn original_changed(original: &Path, swap_path: &Path) -> bool {
    let (orig_mtime, _) = file_stamp(original);
    if orig_mtime == 0 {
        return false;
    }
    let (swap_mtime, _) = file_stamp(swap_path);
    orig_mtime > swap_mtime
}

/// Copy the tree into `out`. Returns true when interrupted.
fn walk(
    store: &mut MemFile,
    out: &mut Output,
    mut original: Option<&mut OriginalText>,
    interrupt: Option<&AtomicBool>,
) -> Result<bool> {
    let page_size = store.page_size();
    let mut stack: Vec<(BlockNr, usize)> = Vec::new();
    // a damaged entry may point back into the tree
    let mut visited = HashSet::from([BlockNr::ROOT]);
    let mut bnum = BlockNr::ROOT;
    let mut page_count = 1;
    let mut line_count = 0;
    let mut idx = 0;

    loop {
        if interrupt.map_or(false, |flag| flag.load(Ordering::Relaxed)) {
            warn!("recovery interrupted");
            return Ok(true);
        }

        match store.get(bnum, page_count) {
            Err(e) if bnum.is_root() => return Err(e),
            Err(e) => {
                warn!(block = %bnum, error = %e, "cannot read block");
                out.problem(MANY_LINES_MISSING)?;
            }
            Ok(header) => match Block::decode(header) {
                Block::Pointer(pb) => {
                    if idx == 0 && line_count != 0 && pb.total_lines() != line_count {
                        out.problem(LINE_COUNT_WRONG)?;
                    }

                    if pb.count() == 0 {
                        store.put(pb.into_header(), false, false);
                        out.problem(EMPTY_BLOCK)?;
                    } else if idx < pb.count() {
                        let entry = pb.entry(idx);
                        if entry.bnum.is_negative() {
                            store.put(pb.into_header(), false, false);
                            let lines = original
                                .as_deref_mut()
                                .and_then(|orig| orig.lines(entry.old_lnum, entry.line_count));
                            match lines {
                                Some(lines) => {
                                    for line in lines {
                                        out.line(line)?;
                                    }
                                }
                                None => out.problem(LINES_MISSING)?,
                            }
                            idx += 1;
                            continue;
                        }

                        store.put(pb.into_header(), false, false);
                        if !visited.insert(entry.bnum) {
                            warn!(block = %entry.bnum, parent = %bnum, "block referenced twice");
                            out.problem(BLOCK_MISSING)?;
                            idx += 1;
                            continue;
                        }

                        stack.push((bnum, idx));
                        bnum = entry.bnum;
                        line_count = entry.line_count;
                        page_count = entry.page_count;
                        idx = 0;
                        continue;
                    } else {
                        store.put(pb.into_header(), false, false);
                    }
                }
                Block::Data(db) => {
                    let mut suspect = false;
                    let mut txt_end = db.txt_end();
                    if page_count * page_size != txt_end {
                        out.problem(MAYBE_MESSED_UP)?;
                        suspect = true;
                        txt_end = page_count * page_size;
                    }
                    if line_count != db.line_count() {
                        out.problem(MAYBE_INSERTED_DELETED)?;
                        suspect = true;
                    }
                    for i in 0..db.line_count() {
                        match db.salvage_line(i, txt_end) {
                            Some(text) => out.line(text)?,
                            None => out.problem(BAD_LINE)?,
                        }
                    }
                    if suspect {
                        out.line(SUSPECT_END.as_bytes())?;
                    }
                    store.put(db.into_header(), false, false);
                }
                other => {
                    store.put(other.into_header(), false, false);
                    if bnum.is_root() {
                        return Err(MemlineError::WrongBlockId {
                            nr: bnum,
                            expected: "pointer",
                        });
                    }
                    out.problem(BLOCK_MISSING)?;
                }
            },
        }

        let Some((parent, parent_idx)) = stack.pop() else {
            return Ok(false);
        };
        bnum = parent;
        idx = parent_idx + 1;
        page_count = 1;
    }
}
