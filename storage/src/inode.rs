//! File metadata records: creation time, size and the ordered block list.

use chrono::{DateTime, Utc};

use crate::layout::{MAX_BLOCKS_PER_FILE, MAX_FILE};

/// Metadata for one file. The block list holds absolute data-block indices
/// in file order; it is append-only while a file is written and its length
/// equals `ceil(size / BLOCK_SIZE)`. The on-image `-1` sentinel never
/// appears here, only in the serialized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub created_at: DateTime<Utc>,
    pub size: u64,
    pub valid: bool,
    pub blocks: Vec<u32>,
}

impl Inode {
    /// Return the record to its empty state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// First unused slot in the block list, or `None` when the list is
    /// full. Pure query.
    pub fn first_free_slot(&self) -> Option<usize> {
        if self.blocks.len() < MAX_BLOCKS_PER_FILE {
            Some(self.blocks.len())
        } else {
            None
        }
    }
}

impl Default for Inode {
    fn default() -> Self {
        Self {
            created_at: DateTime::UNIX_EPOCH,
            size: 0,
            valid: false,
            blocks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeTable {
    inodes: Vec<Inode>,
}

impl InodeTable {
    pub fn new() -> Self {
        Self {
            inodes: vec![Inode::default(); MAX_FILE],
        }
    }

    /// First-fit scan: lowest invalid inode, if any. Pure query.
    pub fn find_free(&self) -> Option<usize> {
        self.inodes.iter().position(|inode| !inode.valid)
    }

    pub fn inode(&self, idx: usize) -> &Inode {
        &self.inodes[idx]
    }

    pub fn inode_mut(&mut self, idx: usize) -> &mut Inode {
        &mut self.inodes[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Inode> {
        self.inodes.iter()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
