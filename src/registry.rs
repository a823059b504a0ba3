//! The set of open memlines, for operations over all buffers.

use crate::error::Result;
use crate::memline::Memline;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared handle to one open memline
pub type SharedMemline = Arc<Mutex<Memline>>;

/// All open memlines of an editor session
#[derive(Default)]
pub struct MemlineSet {
    buffers: Vec<SharedMemline>,
    interrupt: Option<Arc<AtomicBool>>,
}

impl MemlineSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop long operations when `flag` is raised
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Add a memline and return its shared handle
    pub fn add(&mut self, memline: Memline) -> SharedMemline {
        let shared = Arc::new(Mutex::new(memline));
        self.buffers.push(shared.clone());
        shared
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    /// Sync every memline that has a swap file. Stops at the first error
    /// or when interrupted.
    pub fn sync_all(&self, check_file: bool) -> Result<()> {
        for buffer in &self.buffers {
            if self.interrupted() {
                debug!("sync interrupted");
                break;
            }
            buffer.lock().sync(check_file)?;
        }
        Ok(())
    }

    /// Preserve every memline that has a swap file
    pub fn preserve_all(&self) -> Result<()> {
        for buffer in &self.buffers {
            let mut ml = buffer.lock();
            if ml.swap_path().is_some() {
                ml.preserve()?;
            }
        }
        Ok(())
    }

    /// Close all memlines
    pub fn close_all(&mut self, delete_swap: bool) -> Result<()> {
        let buffers = std::mem::take(&mut self.buffers);
        close_each(buffers, delete_swap)
    }

    /// Close the memlines without unsaved changes; returns how many
    pub fn close_unmodified(&mut self, delete_swap: bool) -> Result<usize> {
        let (unmodified, modified): (Vec<_>, Vec<_>) = std::mem::take(&mut self.buffers)
            .into_iter()
            .partition(|b| !b.lock().is_modified());
        self.buffers = modified;
        let closed = unmodified.len();
        close_each(unmodified, delete_swap)?;
        Ok(closed)
    }
}

fn close_each(buffers: Vec<SharedMemline>, delete_swap: bool) -> Result<()> {
    for buffer in buffers {
        match Arc::try_unwrap(buffer) {
            Ok(ml) => ml.into_inner().close(delete_swap)?,
            Err(shared) => {
                // still referenced elsewhere: write it out, the last owner closes it
                warn!(swap = ?shared.lock().swap_path(), "memline still in use, not closing");
                shared.lock().flush()?;
            }
        }
    }
    Ok(())
}
