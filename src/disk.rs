//! File-backed virtual disk. A disk image is a plain host file whose length is
//! a multiple of BLOCK_SIZE.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use log::{debug, error};

use crate::config::BLOCK_SIZE;
use crate::error::{FsError, Result};
use crate::BlockDevice;

#[derive(Debug)]
pub struct FileDisk {
    inner: Mutex<Option<File>>,
    num_blocks: usize,
}

impl FileDisk {
    /// Opens an existing disk image.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                debug!("cannot open disk image {}: {}", path.display(), e);
                FsError::IoError
            })?;
        let len = file.metadata().map_err(io_error)?.len() as usize;
        if len % BLOCK_SIZE != 0 {
            debug!("disk image {} has a partial trailing block", path.display());
        }
        Ok(Self {
            inner: Mutex::new(Some(file)),
            num_blocks: len / BLOCK_SIZE,
        })
    }

    /// Creates (or truncates) a zero-filled disk image of `num_blocks` blocks.
    pub fn create(path: impl AsRef<Path>, num_blocks: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .map_err(io_error)?;
        file.set_len((num_blocks * BLOCK_SIZE) as u64).map_err(io_error)?;
        Ok(Self {
            inner: Mutex::new(Some(file)),
            num_blocks,
        })
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut File) -> std::io::Result<T>) -> Result<T> {
        let mut guard = self.inner.lock().map_err(|_| FsError::IoError)?;
        let file = guard.as_mut().ok_or(FsError::IoError)?;
        f(file).map_err(io_error)
    }

    fn check_request(&self, block_id: usize, len: usize) -> Result<()> {
        if block_id >= self.num_blocks || len != BLOCK_SIZE {
            return Err(FsError::IoError);
        }
        Ok(())
    }
}

fn io_error(e: std::io::Error) -> FsError {
    error!("disk I/O failed: {}", e);
    FsError::IoError
}

impl BlockDevice for FileDisk {
    fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<()> {
        self.check_request(block_id, buf.len())?;
        self.with_file(|file| {
            file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))?;
            file.read_exact(buf)
        })
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<()> {
        self.check_request(block_id, buf.len())?;
        self.with_file(|file| {
            file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))?;
            file.write_all(buf)
        })
    }

    fn flush(&self) -> Result<()> {
        self.with_file(|file| file.sync_data())
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.inner.lock().map_err(|_| FsError::IoError)?;
        match guard.take() {
            Some(file) => file.sync_all().map_err(io_error),
            None => Err(FsError::IoError),
        }
    }
}
