//! Tree export and consistency checks.

use super::Memline;
use crate::block::{Block, PointerEntry};
use crate::error::{MemlineError, Result};
use crate::types::{BlockNr, LineNr};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Block of the line tree, for visualization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    /// Block number
    pub block_nr: i64,
    /// Whether this is a data block
    pub is_data: bool,
    /// Number of pages
    pub page_count: usize,
    /// Lines in this subtree according to the block contents
    pub line_count: LineNr,
    /// Free bytes (only for data blocks)
    pub free: Option<usize>,
    /// Line number in the original file recorded by the parent, 0 if unknown
    pub old_lnum: LineNr,
    /// Child blocks (only for pointer blocks)
    pub children: Vec<TreeNode>,
}

/// Shape of the tree found by [`Memline::verify`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeStats {
    /// Total number of lines
    pub line_count: LineNr,
    /// Levels including the data blocks
    pub depth: usize,
    pub pointer_blocks: usize,
    pub data_blocks: usize,
}

/// Memline statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemlineStats {
    pub line_count: LineNr,
    pub page_size: usize,
    pub swap_file: Option<PathBuf>,
    pub original: Option<PathBuf>,
    pub empty: bool,
    pub modified: bool,
    /// Blocks checked out of the store
    pub locked_blocks: usize,
    /// Pointer entries may still hold negative block numbers
    pub needs_translation: bool,
}

impl Memline {
    /// Get statistics about the memline
    pub fn stats(&self) -> MemlineStats {
        MemlineStats {
            line_count: self.line_count,
            page_size: self.store.page_size(),
            swap_file: self.store.path().map(|p| p.to_path_buf()),
            original: self.original.clone(),
            empty: self.empty,
            modified: self.modified,
            locked_blocks: self.store.locked_count(),
            needs_translation: self.store.needs_translation(),
        }
    }

    /// Export the tree structure for visualization
    pub fn export_tree(&mut self) -> Result<TreeNode> {
        self.flush()?;
        let mut problems = Vec::new();
        let root = PointerEntry {
            bnum: BlockNr::ROOT,
            line_count: self.line_count,
            old_lnum: 1,
            page_count: 1,
        };
        self.export_node(root, 1, &mut Vec::new(), &mut problems)
    }

    /// Walk the whole tree and check that every pointer entry's line count
    /// matches the block it references and that the total is the line
    /// count of the memline.
    pub fn verify(&mut self) -> Result<TreeStats> {
        self.flush()?;
        let mut problems = Vec::new();
        let mut depths = Vec::new();
        let root = PointerEntry {
            bnum: BlockNr::ROOT,
            line_count: self.line_count,
            old_lnum: 1,
            page_count: 1,
        };
        let tree = self.export_node(root, 1, &mut depths, &mut problems)?;

        if tree.is_data {
            problems.push("block 1 is not a pointer block".to_string());
        }
        if tree.line_count != self.line_count {
            problems.push(format!(
                "tree holds {} lines, memline has {}",
                tree.line_count, self.line_count
            ));
        }
        if depths.iter().any(|&d| d != depths[0]) {
            problems.push(format!("data blocks at different depths: {:?}", depths));
        }
        if let Some(problem) = problems.into_iter().next() {
            return Err(MemlineError::corruption(problem));
        }

        let mut stats = TreeStats {
            line_count: tree.line_count,
            depth: depths.first().copied().unwrap_or(0),
            ..TreeStats::default()
        };
        count_blocks(&tree, &mut stats);
        Ok(stats)
    }

    fn export_node(
        &mut self,
        entry: PointerEntry,
        depth: usize,
        depths: &mut Vec<usize>,
        problems: &mut Vec<String>,
    ) -> Result<TreeNode> {
        let header = self.store.get(entry.bnum, entry.page_count)?;
        let nr = header.nr();

        let child_entries = match Block::decode(header) {
            Block::Data(block) => {
                if let Err(problem) = block.check() {
                    problems.push(format!("data block {}: {}", nr, problem));
                }
                let node = TreeNode {
                    block_nr: nr.value(),
                    is_data: true,
                    page_count: block.page_count(),
                    line_count: block.line_count(),
                    free: Some(block.free()),
                    old_lnum: entry.old_lnum,
                    children: Vec::new(),
                };
                self.store.put(block.into_header(), false, false);
                depths.push(depth);
                return Ok(node);
            }
            Block::Pointer(pb) => {
                let entries = pb.entries();
                if entries.is_empty() {
                    problems.push(format!("pointer block {} is empty", nr));
                }
                self.store.put(pb.into_header(), false, false);
                entries
            }
            other => {
                let kind = other.kind();
                self.store.put(other.into_header(), false, false);
                return Err(MemlineError::corruption(format!(
                    "block {} in the tree is a {} block",
                    nr, kind
                )));
            }
        };

        let mut children = Vec::with_capacity(child_entries.len());
        for child in child_entries {
            let node = self.export_node(child, depth + 1, depths, problems)?;
            if node.line_count != child.line_count {
                problems.push(format!(
                    "pointer block {} says {} lines for block {}, found {}",
                    nr, child.line_count, child.bnum, node.line_count
                ));
            }
            children.push(node);
        }

        Ok(TreeNode {
            block_nr: nr.value(),
            is_data: false,
            page_count: 1,
            line_count: children.iter().map(|c| c.line_count).sum(),
            free: None,
            old_lnum: entry.old_lnum,
            children,
        })
    }
}

fn count_blocks(node: &TreeNode, stats: &mut TreeStats) {
    if node.is_data {
        stats.data_blocks += 1;
    } else {
        stats.pointer_blocks += 1;
        for child in &node.children {
            count_blocks(child, stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Result;
    use crate::memline::tests::{memory, text};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_export_small_tree() -> Result<()> {
        let mut ml = memory(crate::PAGE_SIZE);
        ml.append(1, b"a")?;
        let tree = ml.export_tree()?;
        assert_eq!(tree.block_nr, 1);
        assert!(!tree.is_data);
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].block_nr, 2);
        assert_eq!(tree.children[0].line_count, 2);

        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["children"][0]["isData"], true);
        Ok(())
    }

    #[test]
    fn test_verify_counts_blocks() -> Result<()> {
        let mut ml = memory(1024);
        for i in 1..=200 {
            ml.append(i - 1, &text(i, 50))?;
        }
        let stats = ml.verify()?;
        assert_eq!(stats.line_count, 201);
        assert_eq!(stats.pointer_blocks, 1);
        assert!(stats.data_blocks > 5);
        assert_eq!(stats.depth, 2);

        let s = ml.stats();
        assert_eq!(s.line_count, 201);
        assert_eq!(s.page_size, 1024);
        assert_eq!(s.locked_blocks, 0);
        Ok(())
    }
}
