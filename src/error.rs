//! Error types for the line store.

use crate::types::{BlockNr, LineNr};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for memline operations
pub type Result<T> = std::result::Result<T, MemlineError>;

/// Errors that can occur in the line store
#[derive(Error, Debug)]
pub enum MemlineError {
    /// I/O error from the underlying swap file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Block could not be found in memory or in the swap file
    #[error("Block {0} not found")]
    BlockNotFound(BlockNr),

    /// Block is already checked out of the store
    #[error("Block {0} is already locked")]
    BlockLocked(BlockNr),

    /// Block does not carry the id tag expected at this position in the tree
    #[error("Block {nr} id wrong (expected {expected} block)")]
    WrongBlockId { nr: BlockNr, expected: &'static str },

    /// Line number outside `1..=line_count`
    #[error("Line number {lnum} out of range (line count {line_count})")]
    LineOutOfRange { lnum: LineNr, line_count: LineNr },

    /// Pointer entries do not cover the requested line
    #[error("Line count wrong in block {0}")]
    LineCountWrong(BlockNr),

    /// Split propagation ran past the root
    #[error("Updated too many blocks")]
    TooManyBlocks,

    /// Block numbers no longer fit the on-disk representation
    #[error("Out of block numbers")]
    OutOfBlocks,

    /// Structural corruption detected in a block
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// File is not a swap file
    #[error("{0} is not a swap file")]
    NotASwapFile(PathBuf),

    /// Swap file was written by an incompatible machine or version
    #[error("{0} cannot be used on this computer")]
    MagicMismatch(PathBuf),

    /// Page size outside the supported range
    #[error("Unsupported page size: {0}")]
    UnsupportedPageSize(usize),

    /// Invalid operation for the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl MemlineError {
    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// True for errors that mean the tree structure is damaged
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::WrongBlockId { .. }
                | Self::LineCountWrong(_)
                | Self::TooManyBlocks
                | Self::Corruption(_)
        )
    }
}
