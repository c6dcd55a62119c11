//! Flat root directory: FILE_MAX_COUNT fixed-size records in one block.
//!
//! Record layout (32 bytes, little-endian):
//! - filename:     16 bytes, NUL-terminated, first byte 0 marks a free slot
//! - size:         u32
//! - first_block:  u16, FAT_EOC when the file owns no blocks
//! - reserved:     10 bytes

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use log::debug;

use crate::config::*;
use crate::error::{FsError, Result};
use crate::BlockDevice;

/// A validated file name: 1..=MAX_FILE_NAME_LEN bytes, no NUL.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FileName {
    bytes: [u8; FILENAME_LEN],
    len: u8,
}

impl FileName {
    pub fn new(name: &str) -> Result<Self> {
        Self::from_bytes(name.as_bytes())
    }

    pub fn from_bytes(name: &[u8]) -> Result<Self> {
        if name.is_empty() || name.len() > MAX_FILE_NAME_LEN || name.contains(&0) {
            return Err(FsError::InvalidName);
        }
        let mut bytes = [0u8; FILENAME_LEN];
        bytes[..name.len()].copy_from_slice(name);
        Ok(Self {
            bytes,
            len: name.len() as u8,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

impl fmt::Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEntry {
    pub name: FileName,
    pub size: u32,
    pub first_block: Option<u16>,
}

impl FileEntry {
    pub fn new(name: FileName) -> Self {
        Self {
            name,
            size: 0,
            first_block: None,
        }
    }

    /// Number of data blocks a file of this size occupies.
    pub fn blocks(&self) -> usize {
        (self.size as usize).div_ceil(BLOCK_SIZE)
    }

    /// `Ok(None)` for a free record. A name without a terminator inside its
    /// 16 bytes makes the whole volume invalid.
    fn decode(raw: &[u8]) -> Result<Option<Self>> {
        let Some(name_end) = raw[..FILENAME_LEN].iter().position(|&c| c == 0) else {
            debug!("directory record without a name terminator: {:?}", &raw[..FILENAME_LEN]);
            return Err(FsError::InvalidVolume);
        };
        if name_end == 0 {
            return Ok(None);
        }
        let name = FileName::from_bytes(&raw[..name_end])?;
        let size = u32::from_le_bytes([raw[16], raw[17], raw[18], raw[19]]);
        let first_block = match u16::from_le_bytes([raw[20], raw[21]]) {
            FAT_EOC => None,
            index => Some(index),
        };
        Ok(Some(Self {
            name,
            size,
            first_block,
        }))
    }

    fn encode(&self, raw: &mut [u8]) {
        raw.fill(0);
        raw[..FILENAME_LEN].copy_from_slice(&self.name.bytes);
        raw[16..20].copy_from_slice(&self.size.to_le_bytes());
        raw[20..22].copy_from_slice(&self.first_block.unwrap_or(FAT_EOC).to_le_bytes());
    }
}

/// In-memory copy of the root directory block.
#[derive(Debug, Clone)]
pub struct Directory {
    slots: Vec<Option<FileEntry>>,
}

impl Directory {
    pub fn new() -> Self {
        Self {
            slots: alloc::vec![None; FILE_MAX_COUNT],
        }
    }

    pub fn load<D: BlockDevice + ?Sized>(device: &D, block_id: usize) -> Result<Self> {
        let mut buf = Box::new([0u8; BLOCK_SIZE]);
        device.read_block(block_id, buf.as_mut_slice())?;
        let slots = buf
            .chunks_exact(DIR_ENTRY_SIZE)
            .map(FileEntry::decode)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { slots })
    }

    pub fn store<D: BlockDevice + ?Sized>(&self, device: &D, block_id: usize) -> Result<()> {
        let mut buf = Box::new([0u8; BLOCK_SIZE]);
        for (slot, raw) in self.slots.iter().zip(buf.chunks_exact_mut(DIR_ENTRY_SIZE)) {
            if let Some(entry) = slot {
                entry.encode(raw);
            }
        }
        device.write_block(block_id, buf.as_slice())
    }

    /// Slot index of the file called `name`.
    pub fn lookup(&self, name: &FileName) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|e| e.name == *name))
    }

    /// Places a new empty file in the lowest free slot.
    pub fn add(&mut self, name: FileName) -> Result<usize> {
        if self.lookup(&name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::DirectoryFull)?;
        self.slots[index] = Some(FileEntry::new(name));
        Ok(index)
    }

    pub fn remove(&mut self, index: usize) -> Option<FileEntry> {
        self.slots.get_mut(index)?.take()
    }

    pub fn get(&self, index: usize) -> Option<&FileEntry> {
        self.slots.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut FileEntry> {
        self.slots.get_mut(index)?.as_mut()
    }

    /// Used slots in slot order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &FileEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|e| (i, e)))
    }

    pub fn count_free(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}
