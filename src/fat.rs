//! File allocation table.
//! One u16 entry per data block: FAT_FREE, FAT_EOC, or the index of the next
//! block in the same chain. The on-disk table occupies `fat_blocks` blocks
//! starting at block FAT_START; entries past `data_blocks` are padding.
//!
//! Entry 0 is reserved: a next pointer of 0 would be indistinguishable from a
//! free entry, so data block 0 is never handed out. A fresh table marks it
//! FAT_EOC. A loaded table keeps whatever link the disk holds there, so a
//! chain that already starts at block 0 stays intact; once freed, the entry
//! goes back to FAT_EOC instead of FAT_FREE.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use log::{error, trace};

use crate::config::*;
use crate::error::Result;
use crate::{BlockDevice, SuperBlock};

#[derive(Debug, Clone)]
pub struct Fat {
    entries: Vec<u16>,
    data_blocks: usize,
}

impl Fat {
    /// An empty table for a freshly formatted volume.
    pub fn new(superblock: &SuperBlock) -> Self {
        let mut entries = vec![FAT_FREE; superblock.fat_blocks as usize * FAT_ENTRIES_PER_BLOCK];
        entries[0] = FAT_EOC;
        Self {
            entries,
            data_blocks: superblock.data_blocks as usize,
        }
    }

    /// Reads every table block in order.
    pub fn load<D: BlockDevice + ?Sized>(device: &D, superblock: &SuperBlock) -> Result<Self> {
        let mut fat = Self::new(superblock);
        let mut buf = Box::new([0u8; BLOCK_SIZE]);
        for (i, chunk) in fat.entries.chunks_mut(FAT_ENTRIES_PER_BLOCK).enumerate() {
            device.read_block(FAT_START + i, buf.as_mut_slice())?;
            for (entry, raw) in chunk.iter_mut().zip(buf.chunks_exact(FAT_ENTRY_SIZE)) {
                *entry = u16::from_le_bytes([raw[0], raw[1]]);
            }
        }
        if fat.entries[0] == FAT_FREE {
            fat.entries[0] = FAT_EOC;
        }
        Ok(fat)
    }

    /// Writes every table block back. Keeps going after a failed block and
    /// returns the first error.
    pub fn store<D: BlockDevice + ?Sized>(&self, device: &D) -> Result<()> {
        let mut buf = Box::new([0u8; BLOCK_SIZE]);
        let mut result = Ok(());
        for (i, chunk) in self.entries.chunks(FAT_ENTRIES_PER_BLOCK).enumerate() {
            for (entry, raw) in chunk.iter().zip(buf.chunks_exact_mut(FAT_ENTRY_SIZE)) {
                raw.copy_from_slice(&entry.to_le_bytes());
            }
            if let Err(e) = device.write_block(FAT_START + i, buf.as_slice()) {
                error!("failed to write FAT block {}: {}", FAT_START + i, e);
                result = result.and(Err(e));
            }
        }
        result
    }

    pub fn data_blocks(&self) -> usize {
        self.data_blocks
    }

    /// Raw entry value, FAT_FREE for indices outside the data region.
    pub fn entry(&self, index: u16) -> u16 {
        if (index as usize) < self.data_blocks {
            self.entries[index as usize]
        } else {
            FAT_FREE
        }
    }

    pub fn count_free(&self) -> usize {
        self.entries[..self.data_blocks]
            .iter()
            .filter(|&&e| e == FAT_FREE)
            .count()
    }

    /// Next block in the chain, `None` at the end of the chain.
    pub fn next(&self, index: u16) -> Option<u16> {
        match self.entry(index) {
            FAT_EOC | FAT_FREE => None,
            next if (next as usize) < self.data_blocks => Some(next),
            bad => {
                error!("FAT entry {} points outside the data region: {}", index, bad);
                None
            }
        }
    }

    /// First-fit allocation. The new block becomes a one-block chain.
    pub fn allocate(&mut self) -> Option<u16> {
        let index = self.entries[..self.data_blocks]
            .iter()
            .skip(1)
            .position(|&e| e == FAT_FREE)?
            + 1;
        self.entries[index] = FAT_EOC;
        trace!("allocated data block {}", index);
        Some(index as u16)
    }

    /// Appends a fresh block after `tail`. `None` means the volume is full.
    pub fn extend(&mut self, tail: u16) -> Option<u16> {
        let new = self.allocate()?;
        self.entries[tail as usize] = new;
        Some(new)
    }

    /// Iterates the chain starting at `head`.
    pub fn chain(&self, head: Option<u16>) -> Chain<'_> {
        Chain {
            fat: self,
            cur: head,
            steps: 0,
        }
    }

    /// Returns every block of the chain to the free pool.
    pub fn free_chain(&mut self, head: Option<u16>) {
        let blocks: Vec<u16> = self.chain(head).collect();
        for index in blocks {
            self.entries[index as usize] = match index {
                0 => FAT_EOC,
                _ => FAT_FREE,
            };
        }
    }

    /// Keeps the first `keep` blocks of the chain and frees the rest.
    /// `keep == 0` frees the whole chain.
    pub fn truncate(&mut self, head: Option<u16>, keep: usize) {
        if keep == 0 {
            self.free_chain(head);
            return;
        }
        let Some(last) = self.chain(head).nth(keep - 1) else {
            return;
        };
        let rest = self.next(last);
        if rest.is_some() {
            trace!("truncating chain after block {}", last);
            self.free_chain(rest);
        }
        self.entries[last as usize] = FAT_EOC;
    }
}

pub struct Chain<'a> {
    fat: &'a Fat,
    cur: Option<u16>,
    steps: usize,
}

impl Iterator for Chain<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        let cur = self.cur?;
        if cur as usize >= self.fat.data_blocks {
            error!("chain reaches block {} outside the data region", cur);
            self.cur = None;
            return None;
        }
        // A chain can never be longer than the table; anything past that is a cycle.
        if self.steps >= self.fat.data_blocks {
            error!("chain through block {} does not terminate", cur);
            self.cur = None;
            return None;
        }
        self.steps += 1;
        self.cur = self.fat.next(cur);
        Some(cur)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fat(data_blocks: usize) -> Fat {
        let mut entries = vec![FAT_FREE; FAT_ENTRIES_PER_BLOCK];
        entries[0] = FAT_EOC;
        Fat {
            entries,
            data_blocks,
        }
    }

    #[test]
    fn test_first_fit() {
        let mut fat = fat(5);
        assert_eq!(fat.count_free(), 4);
        assert_eq!(fat.allocate(), Some(1));
        assert_eq!(fat.allocate(), Some(2));
        fat.free_chain(Some(1));
        assert_eq!(fat.allocate(), Some(1));
        assert_eq!(fat.count_free(), 2);
    }

    #[test]
    fn test_block_zero_never_allocated() {
        let mut fat = fat(3);
        fat.entries[0] = FAT_FREE;
        assert_eq!(fat.allocate(), Some(1));
        assert_eq!(fat.allocate(), Some(2));
        assert_eq!(fat.allocate(), None);
    }

    #[test]
    fn test_chain_through_block_zero() {
        let mut fat = fat(4);
        fat.entries[0] = 1;
        fat.entries[1] = FAT_EOC;
        assert_eq!(fat.chain(Some(0)).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(fat.count_free(), 2);
        assert_eq!(fat.allocate(), Some(2));

        fat.free_chain(Some(0));
        assert_eq!(fat.entry(0), FAT_EOC);
        assert_eq!(fat.entry(1), FAT_FREE);
        assert_eq!(fat.allocate(), Some(1));
    }

    #[test]
    fn test_extend_and_walk() {
        let mut fat = fat(8);
        let head = fat.allocate().unwrap();
        let b = fat.extend(head).unwrap();
        let c = fat.extend(b).unwrap();
        assert_eq!(fat.chain(Some(head)).collect::<Vec<_>>(), vec![head, b, c]);
        assert_eq!(fat.next(c), None);
        assert_eq!(fat.entry(c), FAT_EOC);
    }

    #[test]
    fn test_full() {
        let mut fat = fat(3);
        let head = fat.allocate().unwrap();
        fat.extend(head).unwrap();
        assert_eq!(fat.allocate(), None);
        assert_eq!(fat.extend(head), None);
        assert_eq!(fat.count_free(), 0);
    }

    #[test]
    fn test_free_empty_chain() {
        let mut fat = fat(3);
        fat.free_chain(None);
        assert_eq!(fat.count_free(), 2);
    }

    #[test]
    fn test_truncate() {
        let mut fat = fat(8);
        let head = fat.allocate().unwrap();
        let mut tail = head;
        for _ in 0..4 {
            tail = fat.extend(tail).unwrap();
        }
        fat.truncate(Some(head), 2);
        assert_eq!(fat.chain(Some(head)).count(), 2);
        assert_eq!(fat.count_free(), 5);
        fat.truncate(Some(head), 0);
        assert_eq!(fat.count_free(), 7);
    }

    #[test]
    fn test_cycle_terminates() {
        let mut fat = fat(3);
        fat.entries[1] = 2;
        fat.entries[2] = 1;
        assert_eq!(fat.chain(Some(1)).count(), 3);
        fat.free_chain(Some(1));
        assert_eq!(fat.count_free(), 2);
    }
}
