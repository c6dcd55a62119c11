//! Common utilities for tests

use std::sync::{Arc, Mutex};

use tinyfat::{BlockDevice, Error, FileSystem, BLOCK_SIZE};

pub const ORANGE: &str = "\x1b[38;5;214m";
pub const RESET: &str = "\x1b[0m";

/// Provides a macro for logging messages during tests.
/// e.g. log!("placeholder") -> println!("[test] placeholder");
#[macro_export]
macro_rules! log {
    ($msg:expr) => {
        println!("{}[test] {}{}", crate::common::ORANGE, $msg, crate::common::RESET)
    };
    ($msg:expr, $($arg:tt)*) => {
        println!("{}[test] {}{}", crate::common::ORANGE, format!($msg, $($arg)*), crate::common::RESET)
    };
}

/// In-memory block device. A block can be marked faulty so that every read
/// and write touching it fails.
pub struct RamDisk {
    inner: Mutex<Vec<u8>>,
    num_blocks: usize,
    faulty: Mutex<Option<usize>>,
}

impl RamDisk {
    /// Creates a new RamDisk with the specified number of blocks.
    /// Each block is BLOCK_SIZE bytes.
    pub fn new(num_blocks: usize) -> Self {
        RamDisk {
            inner: Mutex::new(vec![0u8; num_blocks * BLOCK_SIZE]),
            num_blocks,
            faulty: Mutex::new(None),
        }
    }

    pub fn fail_on(&self, block_id: usize) {
        *self.faulty.lock().unwrap() = Some(block_id);
    }

    pub fn heal(&self) {
        *self.faulty.lock().unwrap() = None;
    }

    /// Raw contents of a block, bypassing fault injection.
    pub fn raw_block(&self, block_id: usize) -> Vec<u8> {
        let data = self.inner.lock().unwrap();
        data[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE].to_vec()
    }

    pub fn set_raw_block(&self, block_id: usize, buf: &[u8]) {
        let mut data = self.inner.lock().unwrap();
        data[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE].copy_from_slice(buf);
    }

    fn check(&self, block_id: usize, len: usize) -> Result<(), Error> {
        if block_id >= self.num_blocks || len != BLOCK_SIZE {
            return Err(Error::IoError);
        }
        if *self.faulty.lock().unwrap() == Some(block_id) {
            return Err(Error::IoError);
        }
        Ok(())
    }
}

impl BlockDevice for RamDisk {
    fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), Error> {
        self.check(block_id, buf.len())?;
        let start = block_id * BLOCK_SIZE;
        let data = self.inner.lock().unwrap();
        buf.copy_from_slice(&data[start..start + BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), Error> {
        self.check(block_id, buf.len())?;
        let start = block_id * BLOCK_SIZE;
        let mut data = self.inner.lock().unwrap();
        data[start..start + BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> Result<(), Error> {
        // In a RAM disk, flushing is a no-op since data is already in memory.
        Ok(())
    }
}

/// A formatted and mounted volume of `num_blocks` blocks.
pub fn fresh(num_blocks: usize) -> (Arc<RamDisk>, FileSystem<RamDisk>) {
    let rd = Arc::new(RamDisk::new(num_blocks));
    let fs = FileSystem::format(Arc::clone(&rd)).unwrap();
    (rd, fs)
}

/// Checks that chains and free entries partition the data region and that
/// every chain has exactly the length its size calls for.
pub fn check_integrity(fs: &FileSystem<RamDisk>) {
    let info = fs.info().unwrap();
    let mut seen = vec![false; info.data_blocks];
    let mut used = 0;
    for file in fs.list().unwrap() {
        let name = file.name.to_string_lossy();
        let blocks = fs.blocks(&name).unwrap();
        assert_eq!(blocks.len(), file.size.div_ceil(BLOCK_SIZE), "chain length of {}", name);
        assert_eq!(file.first_block, blocks.first().copied(), "first block of {}", name);
        for b in blocks {
            assert!(!seen[b as usize], "block {} shared", b);
            seen[b as usize] = true;
            used += 1;
        }
    }
    // Data block 0 is reserved by the allocation table unless a chain already owns it.
    let reserved = usize::from(!seen[0]);
    assert_eq!(info.fat_free + used + reserved, info.data_blocks, "free space not conserved");
}
