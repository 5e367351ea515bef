//! Image serialization: the exact byte layout of the image files.
//!
//! Everything is little-endian, written in one fixed order with no
//! padding:
//! 1. `MAX_FILE` directory slots: `i32` name length (0 for an empty
//!    slot) plus that many raw name bytes, then `i32` valid, `i32` inode
//!    index (-1 when unset), `i32` hidden, `i32` read-only.
//! 2. `MAX_FILE` free-inode-map bytes, one per slot.
//! 3. `NUM_DATA_BLOCKS` free-block-map bytes, one per data block.
//! 4. `MAX_FILE` inodes: `i64` creation timestamp (Unix seconds), `i32`
//!    size, `i32` valid, `MAX_BLOCKS_PER_FILE` `i32` block indices with
//!    -1 marking unused slots.
//! 5. Every data block, `BLOCK_SIZE` raw bytes each, unconditionally.
//!
//! Decoding is strict about structure: out-of-range name lengths, inode
//! or block indices, non-contiguous block lists and short reads are all
//! reported as corruption. Flag and map bytes are taken as set when
//! nonzero.

use std::io::{ErrorKind, Read, Write};

use chrono::{TimeZone, Utc};
use tracing::info;

use crate::engine::FileSystemImage;
use crate::layout::{
    FIRST_DATA_BLOCK, MAX_BLOCKS_PER_FILE, MAX_FILE, MAX_FILENAME, MAX_FILE_SIZE, NUM_BLOCKS,
    NUM_DATA_BLOCKS,
};
use crate::{FsError, Result};

impl FileSystemImage {
    /// Serialize the whole image. The writer sees one linear byte stream;
    /// buffering is the caller's concern.
    pub fn save_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        for entry in self.directory.iter() {
            match &entry.name {
                Some(name) => {
                    write_i32(writer, name.len() as i32)?;
                    writer.write_all(name.as_bytes())?;
                }
                None => write_i32(writer, 0)?,
            }
            write_i32(writer, entry.valid as i32)?;
            write_i32(writer, entry.inode.map_or(-1, |idx| idx as i32))?;
            write_i32(writer, entry.hidden as i32)?;
            write_i32(writer, entry.readonly as i32)?;
        }

        let inode_map: Vec<u8> = (0..MAX_FILE)
            .map(|idx| self.inode_map.is_set(idx) as u8)
            .collect();
        writer.write_all(&inode_map)?;

        let block_map: Vec<u8> = (0..NUM_DATA_BLOCKS)
            .map(|slot| self.block_map.inner().is_set(slot) as u8)
            .collect();
        writer.write_all(&block_map)?;

        for inode in self.inodes.iter() {
            write_i64(writer, inode.created_at.timestamp())?;
            write_i32(writer, inode.size as i32)?;
            write_i32(writer, inode.valid as i32)?;
            for slot in 0..MAX_BLOCKS_PER_FILE {
                write_i32(writer, inode.blocks.get(slot).map_or(-1, |block| *block as i32))?;
            }
        }

        for block in FIRST_DATA_BLOCK..NUM_BLOCKS {
            writer.write_all(self.blocks.block(block as u32))?;
        }

        let stats = self.stats();
        info!(
            "saved image: {} files, {} bytes used",
            stats.total_files, stats.used_bytes
        );
        Ok(())
    }

    /// Decode a complete image from `reader`. The result only replaces a
    /// caller's current image if decoding succeeds end to end.
    pub fn load_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut image = Self::new();

        for idx in 0..MAX_FILE {
            let len = read_i32(reader)?;
            if !(0..=MAX_FILENAME as i32).contains(&len) {
                return Err(FsError::Corruption(format!(
                    "directory slot {}: name length {}",
                    idx, len
                )));
            }
            let name = if len > 0 {
                let mut buf = vec![0u8; len as usize];
                read_bytes(reader, &mut buf)?;
                let name = String::from_utf8(buf).map_err(|_| {
                    FsError::Corruption(format!("directory slot {}: name is not UTF-8", idx))
                })?;
                Some(name)
            } else {
                None
            };
            let valid = read_i32(reader)? != 0;
            let inode = match read_i32(reader)? {
                -1 => None,
                raw if (0..MAX_FILE as i32).contains(&raw) => Some(raw as usize),
                raw => {
                    return Err(FsError::Corruption(format!(
                        "directory slot {}: inode index {}",
                        idx, raw
                    )))
                }
            };
            let hidden = read_i32(reader)? != 0;
            let readonly = read_i32(reader)? != 0;
            if valid && (name.is_none() || inode.is_none()) {
                return Err(FsError::Corruption(format!(
                    "directory slot {}: valid entry without name or inode",
                    idx
                )));
            }

            let entry = image.directory.entry_mut(idx);
            entry.name = name;
            entry.valid = valid;
            entry.inode = inode;
            entry.hidden = hidden;
            entry.readonly = readonly;
        }

        let mut inode_map = [0u8; MAX_FILE];
        read_bytes(reader, &mut inode_map)?;
        for (idx, byte) in inode_map.iter().enumerate() {
            if *byte != 0 {
                image.inode_map.set(idx);
            }
        }

        let mut block_map = vec![0u8; NUM_DATA_BLOCKS];
        read_bytes(reader, &mut block_map)?;
        for (slot, byte) in block_map.iter().enumerate() {
            if *byte != 0 {
                image.block_map.inner_mut().set(slot);
            }
        }

        for idx in 0..MAX_FILE {
            let stamp = read_i64(reader)?;
            let created_at = Utc.timestamp_opt(stamp, 0).single().ok_or_else(|| {
                FsError::Corruption(format!("inode {}: timestamp {}", idx, stamp))
            })?;
            let size = read_i32(reader)?;
            if size < 0 || size as u64 > MAX_FILE_SIZE {
                return Err(FsError::Corruption(format!("inode {}: size {}", idx, size)));
            }
            let valid = read_i32(reader)? != 0;

            let mut blocks = Vec::new();
            let mut terminated = false;
            for _ in 0..MAX_BLOCKS_PER_FILE {
                match read_i32(reader)? {
                    -1 => terminated = true,
                    raw if (FIRST_DATA_BLOCK as i32..NUM_BLOCKS as i32).contains(&raw) => {
                        if terminated {
                            return Err(FsError::Corruption(format!(
                                "inode {}: block list not contiguous",
                                idx
                            )));
                        }
                        blocks.push(raw as u32);
                    }
                    raw => {
                        return Err(FsError::Corruption(format!(
                            "inode {}: block index {}",
                            idx, raw
                        )))
                    }
                }
            }

            let inode = image.inodes.inode_mut(idx);
            inode.created_at = created_at;
            inode.size = size as u64;
            inode.valid = valid;
            inode.blocks = blocks;
        }

        for block in FIRST_DATA_BLOCK..NUM_BLOCKS {
            read_bytes(reader, image.blocks.block_mut(block as u32))?;
        }

        let stats = image.stats();
        info!(
            "loaded image: {} files, {} bytes used",
            stats.total_files, stats.used_bytes
        );
        Ok(image)
    }
}

fn write_i32<W: Write>(writer: &mut W, value: i32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_i64<W: Write>(writer: &mut W, value: i64) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_bytes<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == ErrorKind::UnexpectedEof {
            FsError::Corruption("image ends early".to_string())
        } else {
            FsError::Io(err)
        }
    })
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    read_bytes(reader, &mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_i64<R: Read>(reader: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    read_bytes(reader, &mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::BLOCK_SIZE;

    // Serialized size of an image with no file names stored.
    fn bare_image_len() -> usize {
        MAX_FILE * 5 * 4
            + MAX_FILE
            + NUM_DATA_BLOCKS
            + MAX_FILE * (8 + 4 + 4 + MAX_BLOCKS_PER_FILE * 4)
            + NUM_DATA_BLOCKS * BLOCK_SIZE
    }

    #[test]
    fn test_empty_image_byte_length_is_fixed() {
        let image = FileSystemImage::new();
        let mut buf = Vec::new();
        image.save_to(&mut buf).unwrap();
        assert_eq!(buf.len(), bare_image_len());
    }

    #[test]
    fn test_empty_image_round_trip() {
        let image = FileSystemImage::new();
        let mut buf = Vec::new();
        image.save_to(&mut buf).unwrap();
        let restored = FileSystemImage::load_from(&mut buf.as_slice()).unwrap();
        assert_eq!(image, restored);
    }

    #[test]
    fn test_truncated_image_is_corruption() {
        let image = FileSystemImage::new();
        let mut buf = Vec::new();
        image.save_to(&mut buf).unwrap();
        buf.truncate(buf.len() / 2);
        let err = FileSystemImage::load_from(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, FsError::Corruption(_)));
    }

    #[test]
    fn test_oversized_name_length_is_corruption() {
        let image = FileSystemImage::new();
        let mut buf = Vec::new();
        image.save_to(&mut buf).unwrap();
        // First field of the stream is slot 0's name length.
        buf[..4].copy_from_slice(&(MAX_FILENAME as i32 + 1).to_le_bytes());
        let err = FileSystemImage::load_from(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, FsError::Corruption(_)));
    }

    #[test]
    fn test_block_index_outside_data_region_is_corruption() {
        let image = FileSystemImage::new();
        let mut buf = Vec::new();
        image.save_to(&mut buf).unwrap();
        // First block-list slot of inode 0: a metadata-region index.
        let offset = MAX_FILE * 5 * 4 + MAX_FILE + NUM_DATA_BLOCKS + 8 + 4 + 4;
        buf[offset..offset + 4].copy_from_slice(&3i32.to_le_bytes());
        let err = FileSystemImage::load_from(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, FsError::Corruption(_)));
    }
}
