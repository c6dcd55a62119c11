//! Volume header stored in block 0.
//!
//! Layout (little-endian, packed):
//! - signature:          8 bytes
//! - total_blocks:       u16
//! - root_dir_block:     u16
//! - data_start:         u16
//! - data_blocks:        u16
//! - fat_blocks:         u8
//! - reserved:           BLOCK_SIZE - 17 bytes

use alloc::boxed::Box;

use log::debug;

use crate::config::*;
use crate::error::{FsError, Result};
use crate::BlockDevice;

const MIN_TOTAL_BLOCKS: usize = 4; // superblock + FAT + root directory + one data block

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    pub signature: [u8; 8],
    pub total_blocks: u16,
    pub root_dir_block: u16,
    pub data_start: u16,
    pub data_blocks: u16,
    pub fat_blocks: u8,
}

impl SuperBlock {
    /// Computes the geometry of a fresh volume spanning `total_blocks` blocks.
    /// The allocation table gets the smallest number of blocks that can index
    /// every remaining data block.
    pub fn new(total_blocks: usize) -> Result<Self> {
        if total_blocks < MIN_TOTAL_BLOCKS || total_blocks > u16::MAX as usize {
            return Err(FsError::InvalidVolume);
        }

        let mut fat_blocks = 1;
        while (total_blocks - 2 - fat_blocks).div_ceil(FAT_ENTRIES_PER_BLOCK) > fat_blocks {
            fat_blocks += 1;
        }
        if fat_blocks > u8::MAX as usize {
            return Err(FsError::InvalidVolume);
        }

        let root_dir_block = FAT_START + fat_blocks;
        let sb = Self {
            signature: *SIGNATURE,
            total_blocks: total_blocks as u16,
            root_dir_block: root_dir_block as u16,
            data_start: (root_dir_block + 1) as u16,
            data_blocks: (total_blocks - root_dir_block - 1) as u16,
            fat_blocks: fat_blocks as u8,
        };
        sb.check_geometry()?;
        Ok(sb)
    }

    pub fn decode(buf: &[u8; BLOCK_SIZE]) -> Self {
        let u16_at = |at: usize| u16::from_le_bytes([buf[at], buf[at + 1]]);
        let mut signature = [0u8; 8];
        signature.copy_from_slice(&buf[..8]);
        Self {
            signature,
            total_blocks: u16_at(8),
            root_dir_block: u16_at(10),
            data_start: u16_at(12),
            data_blocks: u16_at(14),
            fat_blocks: buf[16],
        }
    }

    pub fn encode(&self, buf: &mut [u8; BLOCK_SIZE]) {
        buf.fill(0);
        buf[..8].copy_from_slice(&self.signature);
        buf[8..10].copy_from_slice(&self.total_blocks.to_le_bytes());
        buf[10..12].copy_from_slice(&self.root_dir_block.to_le_bytes());
        buf[12..14].copy_from_slice(&self.data_start.to_le_bytes());
        buf[14..16].copy_from_slice(&self.data_blocks.to_le_bytes());
        buf[16] = self.fat_blocks;
    }

    /// Checks the structural invariants that do not depend on the device.
    pub fn check_geometry(&self) -> Result<()> {
        let fat_needed = (self.data_blocks as usize).div_ceil(FAT_ENTRIES_PER_BLOCK);
        let valid = &self.signature == SIGNATURE
            && self.data_blocks > 0
            && self.data_blocks < FAT_EOC
            && self.fat_blocks as usize >= fat_needed.max(1)
            && self.root_dir_block as usize == FAT_START + self.fat_blocks as usize
            && self.data_start as usize == self.root_dir_block as usize + 1
            && self.data_start as usize + self.data_blocks as usize == self.total_blocks as usize;
        if !valid {
            return Err(FsError::InvalidVolume);
        }
        Ok(())
    }

    /// Device block holding the data block at FAT index `index`.
    pub fn data_block_id(&self, index: u16) -> usize {
        self.data_start as usize + index as usize
    }
}

pub fn read_superblock<D: BlockDevice + ?Sized>(device: &D) -> Result<SuperBlock> {
    let mut buf = Box::new([0u8; BLOCK_SIZE]);
    device.read_block(SUPERBLOCK_ID, buf.as_mut_slice())?;
    let superblock = SuperBlock::decode(&buf);

    if &superblock.signature != SIGNATURE {
        debug!("superblock signature mismatch: {:?}", superblock.signature);
        return Err(FsError::InvalidVolume);
    }
    if superblock.total_blocks as usize != device.num_blocks() {
        debug!(
            "superblock claims {} blocks, device has {}",
            superblock.total_blocks,
            device.num_blocks()
        );
        return Err(FsError::InvalidVolume);
    }
    superblock.check_geometry()?;

    Ok(superblock)
}

pub fn write_superblock<D: BlockDevice + ?Sized>(device: &D, superblock: &SuperBlock) -> Result<()> {
    let mut buf = Box::new([0u8; BLOCK_SIZE]);
    superblock.encode(&mut buf);
    device.write_block(SUPERBLOCK_ID, buf.as_slice())?;
    Ok(())
}
