//! Recency order of the unlocked blocks held in memory.

use crate::types::BlockNr;
use std::collections::HashMap;

/// Least recently used ordering of cached block numbers
pub struct LruCache {
    /// Maps block number to its node
    positions: HashMap<BlockNr, usize>,
    /// Doubly-linked list nodes for O(1) removal
    nodes: Vec<LruNode>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    /// Unused node slots
    free_slots: Vec<usize>,
}

#[derive(Clone, Copy)]
struct LruNode {
    nr: BlockNr,
    prev: Option<usize>,
    next: Option<usize>,
}

impl LruCache {
    /// Create an empty order sized for `capacity` blocks
    pub fn new(capacity: usize) -> Self {
        Self {
            positions: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            head: None,
            tail: None,
            free_slots: Vec::new(),
        }
    }

    /// Mark a block as just used
    pub fn touch(&mut self, nr: BlockNr) {
        match self.positions.get(&nr) {
            Some(&pos) => {
                if self.head != Some(pos) {
                    self.unlink(pos);
                    self.link_front(pos);
                }
            }
            None => {
                let node = LruNode {
                    nr,
                    prev: None,
                    next: None,
                };
                let pos = match self.free_slots.pop() {
                    Some(pos) => {
                        self.nodes[pos] = node;
                        pos
                    }
                    None => {
                        self.nodes.push(node);
                        self.nodes.len() - 1
                    }
                };
                self.link_front(pos);
                self.positions.insert(nr, pos);
            }
        }
    }

    /// Forget a block
    pub fn remove(&mut self, nr: BlockNr) {
        if let Some(pos) = self.positions.remove(&nr) {
            self.unlink(pos);
            self.free_slots.push(pos);
        }
    }

    /// Least recently used block
    pub fn oldest(&self) -> Option<BlockNr> {
        self.tail.map(|pos| self.nodes[pos].nr)
    }

    /// Remove and return the least recently used block
    #[cfg(test)]
    pub fn pop_oldest(&mut self) -> Option<BlockNr> {
        let nr = self.oldest()?;
        self.remove(nr);
        Some(nr)
    }

    /// Number of blocks tracked
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Check if nothing is tracked
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn link_front(&mut self, pos: usize) {
        self.nodes[pos].prev = None;
        self.nodes[pos].next = self.head;
        if let Some(old_head) = self.head {
            self.nodes[old_head].prev = Some(pos);
        }
        self.head = Some(pos);
        if self.tail.is_none() {
            self.tail = Some(pos);
        }
    }

    fn unlink(&mut self, pos: usize) {
        let node = self.nodes[pos];
        match node.prev {
            Some(prev) => self.nodes[prev].next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.nodes[next].prev = node.prev,
            None => self.tail = node.prev,
        }
    }
}
