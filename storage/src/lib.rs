mod bitmap;
mod directory;
mod engine;
mod inode;
mod layout;
mod persist;

pub use bitmap::{Bitmap, BlockMap};
pub use directory::{DirectoryEntry, DirectoryTable};
pub use engine::{Attrib, FileSystemImage, ListEntry};
pub use inode::{Inode, InodeTable};
pub use layout::{
    BlockStore, BLOCK_SIZE, FIRST_DATA_BLOCK, MAX_BLOCKS_PER_FILE, MAX_FILE, MAX_FILENAME,
    MAX_FILE_SIZE, NUM_BLOCKS, NUM_DATA_BLOCKS,
};

/// Point-in-time summary of an image's occupancy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageStats {
    pub total_files: usize,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("insufficient space: {0}")]
    InsufficientSpace(String),

    #[error("file name too long: {0}")]
    NameTooLong(String),

    #[error("corrupt image: {0}")]
    Corruption(String),
}
