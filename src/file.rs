//! Byte-range I/O over block chains.
//!
//! An absolute file offset is turned into (block in chain, byte in block) by
//! walking the chain from the first block, so seeking deep into a large file
//! costs O(chain length). Every transfer goes through a full-block bounce
//! buffer, which is what lets reads and writes start and end anywhere inside
//! a block.

use alloc::boxed::Box;

use log::{trace, warn};

use crate::config::BLOCK_SIZE;
use crate::directory::FileEntry;
use crate::error::Result;
use crate::fat::Fat;
use crate::{BlockDevice, SuperBlock};

/// Staging buffer for one data block.
struct Bounce<'a, D: BlockDevice + ?Sized> {
    device: &'a D,
    superblock: &'a SuperBlock,
    buf: Box<[u8; BLOCK_SIZE]>,
}

impl<'a, D: BlockDevice + ?Sized> Bounce<'a, D> {
    fn new(device: &'a D, superblock: &'a SuperBlock) -> Self {
        Self {
            device,
            superblock,
            buf: Box::new([0u8; BLOCK_SIZE]),
        }
    }

    /// Copies `out.len()` bytes starting at `start` within data block `index`.
    fn read(&mut self, index: u16, start: usize, out: &mut [u8]) -> Result<()> {
        let block_id = self.superblock.data_block_id(index);
        self.device.read_block(block_id, self.buf.as_mut_slice())?;
        out.copy_from_slice(&self.buf[start..start + out.len()]);
        Ok(())
    }

    /// Overwrites `data.len()` bytes starting at `start` within data block
    /// `index`, preserving the rest of the block.
    fn write(&mut self, index: u16, start: usize, data: &[u8]) -> Result<()> {
        let block_id = self.superblock.data_block_id(index);
        if data.len() < BLOCK_SIZE {
            self.device.read_block(block_id, self.buf.as_mut_slice())?;
        }
        self.buf[start..start + data.len()].copy_from_slice(data);
        self.device.write_block(block_id, self.buf.as_slice())
    }
}

/// Reads from `entry` at `offset` into `buffer`.
/// Returns the number of bytes read, 0 at or past end of file.
pub fn fread<D: BlockDevice + ?Sized>(
    device: &D,
    superblock: &SuperBlock,
    fat: &Fat,
    entry: &FileEntry,
    offset: usize,
    buffer: &mut [u8],
) -> Result<usize> {
    let size = entry.size as usize;
    let len = buffer.len().min(size.saturating_sub(offset));
    if len == 0 {
        return Ok(0);
    }

    let mut blocks = fat.chain(entry.first_block).skip(offset / BLOCK_SIZE);
    let mut bounce = Bounce::new(device, superblock);
    let mut bytes_read = 0;
    let mut start = offset % BLOCK_SIZE;

    while bytes_read < len {
        let Some(index) = blocks.next() else {
            warn!("chain of {} ends before its size {}", entry.name, size);
            break;
        };
        let n = (BLOCK_SIZE - start).min(len - bytes_read);
        if let Err(e) = bounce.read(index, start, &mut buffer[bytes_read..bytes_read + n]) {
            if bytes_read == 0 {
                return Err(e);
            }
            warn!("read of {} stopped at {} bytes: {}", entry.name, bytes_read, e);
            break;
        }
        trace!("read {} bytes from data block {}", n, index);
        bytes_read += n;
        start = 0;
    }

    Ok(bytes_read)
}

/// Writes `buffer` to `entry` at `offset`, growing the chain as needed.
/// `offset` must not exceed the file size.
///
/// Returns the number of bytes stored. Running out of blocks gives a short
/// count rather than an error; `entry` is updated in place and the caller
/// decides when to persist it.
pub fn fwrite<D: BlockDevice + ?Sized>(
    device: &D,
    superblock: &SuperBlock,
    fat: &mut Fat,
    entry: &mut FileEntry,
    offset: usize,
    buffer: &[u8],
) -> Result<usize> {
    if buffer.is_empty() {
        return Ok(0);
    }
    debug_assert!(offset <= entry.size as usize);
    // File sizes are stored as u32.
    let buffer = &buffer[..buffer.len().min(u32::MAX as usize - offset)];

    let head = match entry.first_block {
        Some(head) => head,
        None => match fat.allocate() {
            Some(head) => {
                entry.first_block = Some(head);
                head
            }
            None => {
                warn!("no free block for {}", entry.name);
                return Ok(0);
            }
        },
    };

    let mut bytes_written = 0;
    let mut failure = None;
    if let Some(mut index) = seek_block(fat, head, offset / BLOCK_SIZE) {
        let mut bounce = Bounce::new(device, superblock);
        let mut start = offset % BLOCK_SIZE;
        loop {
            let n = (BLOCK_SIZE - start).min(buffer.len() - bytes_written);
            if let Err(e) = bounce.write(index, start, &buffer[bytes_written..bytes_written + n]) {
                failure = Some(e);
                break;
            }
            trace!("wrote {} bytes to data block {}", n, index);
            bytes_written += n;
            start = 0;
            if bytes_written == buffer.len() {
                break;
            }
            match fat.next(index).or_else(|| fat.extend(index)) {
                Some(next) => index = next,
                None => break,
            }
        }
    }

    if bytes_written < buffer.len() {
        warn!(
            "short write to {}: {} of {} bytes",
            entry.name,
            bytes_written,
            buffer.len()
        );
    }

    let end = offset + bytes_written;
    if end > entry.size as usize {
        entry.size = end as u32;
    }
    // Drop blocks that were allocated but never filled.
    fat.truncate(entry.first_block, entry.blocks());
    if entry.size == 0 {
        entry.first_block = None;
    }

    match failure {
        Some(e) if bytes_written == 0 => Err(e),
        _ => Ok(bytes_written),
    }
}

/// Walks `steps` links from `head`, extending the chain when it ends early.
/// This only happens when writing at an offset that is exactly the end of a
/// file whose size is a multiple of BLOCK_SIZE.
fn seek_block(fat: &mut Fat, head: u16, steps: usize) -> Option<u16> {
    let mut index = head;
    for _ in 0..steps {
        index = fat.next(index).or_else(|| fat.extend(index))?;
    }
    Some(index)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::directory::FileName;
    use alloc::vec;
    use alloc::vec::Vec;
    use std::sync::Mutex;

    struct MemDisk(Mutex<Vec<u8>>, usize);

    impl MemDisk {
        fn new(blocks: usize) -> Self {
            Self(Mutex::new(vec![0; blocks * BLOCK_SIZE]), blocks)
        }
    }

    impl BlockDevice for MemDisk {
        fn num_blocks(&self) -> usize {
            self.1
        }

        fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<()> {
            let data = self.0.lock().unwrap();
            buf.copy_from_slice(&data[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE]);
            Ok(())
        }

        fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<()> {
            let mut data = self.0.lock().unwrap();
            data[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE].copy_from_slice(buf);
            Ok(())
        }

        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    fn setup(blocks: usize) -> (MemDisk, SuperBlock, Fat, FileEntry) {
        let disk = MemDisk::new(blocks);
        let sb = SuperBlock::new(blocks).unwrap();
        let fat = Fat::new(&sb);
        let entry = FileEntry::new(FileName::new("f").unwrap());
        (disk, sb, fat, entry)
    }

    #[test]
    fn test_unaligned_overwrite() {
        let (disk, sb, mut fat, mut entry) = setup(16);
        let data = vec![1u8; 3 * BLOCK_SIZE];
        assert_eq!(fwrite(&disk, &sb, &mut fat, &mut entry, 0, &data), Ok(data.len()));

        let patch = vec![2u8; BLOCK_SIZE];
        let at = BLOCK_SIZE / 2;
        assert_eq!(fwrite(&disk, &sb, &mut fat, &mut entry, at, &patch), Ok(BLOCK_SIZE));
        assert_eq!(entry.size as usize, 3 * BLOCK_SIZE);

        let mut out = vec![0u8; 3 * BLOCK_SIZE];
        assert_eq!(fread(&disk, &sb, &fat, &entry, 0, &mut out), Ok(out.len()));
        assert!(out[..at].iter().all(|&b| b == 1));
        assert!(out[at..at + BLOCK_SIZE].iter().all(|&b| b == 2));
        assert!(out[at + BLOCK_SIZE..].iter().all(|&b| b == 1));
    }

    #[test]
    fn test_append_at_block_boundary() {
        let (disk, sb, mut fat, mut entry) = setup(16);
        let data = vec![9u8; BLOCK_SIZE];
        fwrite(&disk, &sb, &mut fat, &mut entry, 0, &data).unwrap();
        assert_eq!(fat.chain(entry.first_block).count(), 1);
        fwrite(&disk, &sb, &mut fat, &mut entry, BLOCK_SIZE, b"tail").unwrap();
        assert_eq!(entry.size as usize, BLOCK_SIZE + 4);
        assert_eq!(fat.chain(entry.first_block).count(), 2);

        let mut out = [0u8; 8];
        assert_eq!(fread(&disk, &sb, &fat, &entry, BLOCK_SIZE - 4, &mut out), Ok(8));
        assert_eq!(&out, b"\x09\x09\x09\x09tail");
    }

    #[test]
    fn test_read_clamped_to_size() {
        let (disk, sb, mut fat, mut entry) = setup(8);
        fwrite(&disk, &sb, &mut fat, &mut entry, 0, b"hello").unwrap();
        let mut out = [0u8; 32];
        assert_eq!(fread(&disk, &sb, &fat, &entry, 2, &mut out), Ok(3));
        assert_eq!(&out[..3], b"llo");
        assert_eq!(fread(&disk, &sb, &fat, &entry, 5, &mut out), Ok(0));
    }

    #[test]
    fn test_empty_write_allocates_nothing() {
        let (disk, sb, mut fat, mut entry) = setup(8);
        let free = fat.count_free();
        assert_eq!(fwrite(&disk, &sb, &mut fat, &mut entry, 0, &[]), Ok(0));
        assert_eq!(entry.first_block, None);
        assert_eq!(fat.count_free(), free);
    }
}
