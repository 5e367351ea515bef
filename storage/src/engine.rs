//! The storage engine proper: an owned image value and the file
//! operations that manipulate it.

use std::fs::File;
use std::io::{Read, Write};
use std::mem;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::bitmap::{Bitmap, BlockMap};
use crate::directory::DirectoryTable;
use crate::inode::InodeTable;
use crate::layout::{BlockStore, BLOCK_SIZE, MAX_FILE, MAX_FILENAME, MAX_FILE_SIZE, NUM_DATA_BLOCKS};
use crate::{FsError, ImageStats, Result};

/// A single attribute change. Exactly one flag is touched per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attrib {
    Hidden(bool),
    ReadOnly(bool),
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// A complete in-memory file system image: the flat directory, the inode
/// table, both occupancy maps and the data-block region.
///
/// The image is an owned value; callers hold at most one at a time and
/// replace it wholesale on `createfs`/`open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemImage {
    pub(crate) directory: DirectoryTable,
    pub(crate) inodes: InodeTable,
    pub(crate) inode_map: Bitmap,
    pub(crate) block_map: BlockMap,
    pub(crate) blocks: BlockStore,
}

impl FileSystemImage {
    /// A fresh, empty image: tables reset, both maps all clear, every
    /// block zero-filled.
    pub fn new() -> Self {
        Self {
            directory: DirectoryTable::new(),
            inodes: InodeTable::new(),
            inode_map: Bitmap::new(MAX_FILE),
            block_map: BlockMap::new(),
            blocks: BlockStore::new(),
        }
    }

    pub fn directory(&self) -> &DirectoryTable {
        &self.directory
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    /// Total free bytes: clear block-map slots times the block size.
    pub fn free_bytes(&self) -> u64 {
        self.block_map.free_bytes()
    }

    pub fn stats(&self) -> ImageStats {
        let total_bytes = (NUM_DATA_BLOCKS * BLOCK_SIZE) as u64;
        let free_bytes = self.free_bytes();
        ImageStats {
            total_files: self.directory.valid_count(),
            total_bytes,
            used_bytes: total_bytes - free_bytes,
            free_bytes,
        }
    }

    /// Ingest a host file, stored under its final path component.
    pub fn put(&mut self, source: &Path) -> Result<()> {
        let name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| FsError::NotFound(source.display().to_string()))?;
        if name.len() > MAX_FILENAME {
            return Err(FsError::NameTooLong(name));
        }

        let metadata = std::fs::metadata(source)
            .map_err(|_| FsError::NotFound(source.display().to_string()))?;
        let size = metadata.len();
        if size > self.free_bytes() {
            return Err(FsError::InsufficientSpace(format!(
                "{} bytes requested, {} free",
                size,
                self.free_bytes()
            )));
        }
        if size > MAX_FILE_SIZE {
            return Err(FsError::InsufficientSpace(format!(
                "{} bytes exceeds the {} byte file limit",
                size, MAX_FILE_SIZE
            )));
        }

        let dir_idx = self
            .directory
            .find_free()
            .ok_or_else(|| FsError::InsufficientSpace("directory table full".to_string()))?;
        let inode_idx = self
            .inodes
            .find_free()
            .ok_or_else(|| FsError::InsufficientSpace("inode table full".to_string()))?;

        let entry = self.directory.entry_mut(dir_idx);
        entry.name = Some(name.clone());
        entry.valid = true;
        entry.inode = Some(inode_idx);
        entry.hidden = false;
        entry.readonly = false;

        let inode = self.inodes.inode_mut(inode_idx);
        inode.created_at = now_secs();
        inode.size = size;
        inode.valid = true;
        inode.blocks.clear();
        self.inode_map.set(inode_idx);

        // Everything reserved from here on is undone by release() if the
        // transfer fails partway, blocks included.
        if let Err(err) = self.copy_in(source, size, inode_idx) {
            self.release(dir_idx);
            return Err(err);
        }

        info!(
            "stored {} ({} bytes, {} blocks)",
            name,
            size,
            self.inodes.inode(inode_idx).blocks.len()
        );
        Ok(())
    }

    /// Extract a stored file to `dest`: the block list in order, the final
    /// block trimmed to the remaining byte count. No allocation state
    /// changes.
    pub fn get(&self, name: &str, dest: &Path) -> Result<()> {
        let dir_idx = self
            .directory
            .find(name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        let inode_idx = self
            .directory
            .entry(dir_idx)
            .inode
            .ok_or_else(|| FsError::Corruption(format!("directory slot {} has no inode", dir_idx)))?;
        let inode = self.inodes.inode(inode_idx);

        let mut out = File::create(dest)?;
        let mut remaining = inode.size;
        for &block in &inode.blocks {
            let chunk = remaining.min(BLOCK_SIZE as u64) as usize;
            out.write_all(&self.blocks.block(block)[..chunk])?;
            remaining -= chunk as u64;
        }
        debug!("extracted {} ({} bytes)", name, inode.size);
        Ok(())
    }

    /// Remove a file and return its every resource to the free pools.
    /// A read-only match is reported the same as absence.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let dir_idx = self
            .directory
            .find_deletable(name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        self.release(dir_idx);
        info!("deleted {}", name);
        Ok(())
    }

    /// Valid entries in slot order; hidden ones only when asked for.
    pub fn list(&self, include_hidden: bool) -> Vec<ListEntry> {
        self.directory
            .iter()
            .filter(|entry| entry.valid && (include_hidden || !entry.hidden))
            .filter_map(|entry| {
                let inode = self.inodes.inode(entry.inode?);
                Some(ListEntry {
                    name: entry.name().to_string(),
                    size: inode.size,
                    created_at: inode.created_at,
                })
            })
            .collect()
    }

    /// Apply exactly one attribute change to a named file.
    pub fn set_attrib(&mut self, name: &str, change: Attrib) -> Result<()> {
        let dir_idx = self
            .directory
            .find(name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        let entry = self.directory.entry_mut(dir_idx);
        match change {
            Attrib::Hidden(on) => entry.hidden = on,
            Attrib::ReadOnly(on) => entry.readonly = on,
        }
        debug!("attrib {:?} on {}", change, name);
        Ok(())
    }

    /// Stream `source` into freshly claimed blocks, appending each to the
    /// inode's block list. Exactly `size` bytes are consumed; the final
    /// partial block keeps whatever the store held past the copied bytes.
    fn copy_in(&mut self, source: &Path, size: u64, inode_idx: usize) -> Result<()> {
        let mut file = File::open(source)?;
        let mut remaining = size;
        while remaining > 0 {
            let chunk = remaining.min(BLOCK_SIZE as u64) as usize;
            let block = self
                .block_map
                .find_free()
                .ok_or_else(|| FsError::InsufficientSpace("no free data blocks".to_string()))?;
            if self.inodes.inode(inode_idx).first_free_slot().is_none() {
                return Err(FsError::InsufficientSpace("file block list full".to_string()));
            }
            file.read_exact(&mut self.blocks.block_mut(block)[..chunk])?;
            self.block_map.set(block);
            self.inodes.inode_mut(inode_idx).blocks.push(block);
            remaining -= chunk as u64;
        }
        Ok(())
    }

    /// Release one file's directory slot, inode, inode-map bit and every
    /// data block in its list. Shared by `delete` and the `put` rollback
    /// path; observable state is either the whole file or none of it.
    fn release(&mut self, dir_idx: usize) {
        let entry = self.directory.entry_mut(dir_idx);
        let inode_idx = entry.inode;
        entry.reset();
        if let Some(inode_idx) = inode_idx {
            let blocks = mem::take(&mut self.inodes.inode_mut(inode_idx).blocks);
            self.inodes.inode_mut(inode_idx).reset();
            self.inode_map.clear(inode_idx);
            for block in blocks {
                self.block_map.clear(block);
            }
        }
    }
}

impl Default for FileSystemImage {
    fn default() -> Self {
        Self::new()
    }
}

/// Current time at whole-second precision; the image format keeps
/// timestamps as Unix seconds.
fn now_secs() -> DateTime<Utc> {
    let now = Utc::now();
    now - chrono::Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FIRST_DATA_BLOCK;

    // Builds the state put() leaves behind right before the transfer loop.
    fn reserve_file(image: &mut FileSystemImage, name: &str, blocks: &[u32]) -> usize {
        let dir_idx = image.directory.find_free().unwrap();
        let inode_idx = image.inodes.find_free().unwrap();
        let entry = image.directory.entry_mut(dir_idx);
        entry.name = Some(name.to_string());
        entry.valid = true;
        entry.inode = Some(inode_idx);
        let inode = image.inodes.inode_mut(inode_idx);
        inode.valid = true;
        inode.size = (blocks.len() * BLOCK_SIZE) as u64;
        inode.blocks = blocks.to_vec();
        image.inode_map.set(inode_idx);
        for &block in blocks {
            image.block_map.set(block);
        }
        dir_idx
    }

    #[test]
    fn test_release_returns_every_resource() {
        let mut image = FileSystemImage::new();
        let first = FIRST_DATA_BLOCK as u32;
        let dir_idx = reserve_file(&mut image, "victim", &[first, first + 1, first + 2]);
        assert_eq!(image.free_bytes(), ((NUM_DATA_BLOCKS - 3) * BLOCK_SIZE) as u64);

        image.release(dir_idx);

        assert!(!image.directory.entry(dir_idx).valid);
        assert_eq!(image.directory.entry(dir_idx).name, None);
        assert_eq!(image.inode_map.first_clear(), Some(0));
        assert_eq!(image.free_bytes(), (NUM_DATA_BLOCKS * BLOCK_SIZE) as u64);
        assert_eq!(image.directory.find_free(), Some(dir_idx));
    }

    #[test]
    fn test_delete_skips_readonly_and_reports_not_found() {
        let mut image = FileSystemImage::new();
        let dir_idx = reserve_file(&mut image, "locked", &[FIRST_DATA_BLOCK as u32]);
        image.directory.entry_mut(dir_idx).readonly = true;

        let err = image.delete("locked").unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
        assert!(image.directory.entry(dir_idx).valid, "entry must survive");

        image.set_attrib("locked", Attrib::ReadOnly(false)).unwrap();
        image.delete("locked").unwrap();
        assert_eq!(image.list(true).len(), 0);
    }

    #[test]
    fn test_list_respects_hidden_flag() {
        let mut image = FileSystemImage::new();
        reserve_file(&mut image, "plain", &[]);
        reserve_file(&mut image, "secret", &[]);
        image.set_attrib("secret", Attrib::Hidden(true)).unwrap();

        let visible = image.list(false);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name, "plain");

        let all = image.list(true);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_stats_track_occupancy() {
        let mut image = FileSystemImage::new();
        let stats = image.stats();
        assert_eq!(stats.total_files, 0);
        assert_eq!(stats.used_bytes, 0);
        assert_eq!(stats.free_bytes, stats.total_bytes);

        reserve_file(&mut image, "a", &[FIRST_DATA_BLOCK as u32, FIRST_DATA_BLOCK as u32 + 1]);
        let stats = image.stats();
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.used_bytes, (2 * BLOCK_SIZE) as u64);
    }
}
