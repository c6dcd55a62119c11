//! Open-file table. Volatile, lives and dies with the mount.

use alloc::vec::Vec;

use crate::config::OPEN_MAX_COUNT;
use crate::error::{FsError, Result};

/// Handle returned by `open`. Only meaningful for the mount that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fd(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    pub dir_index: usize,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct FdTable {
    slots: Vec<Option<OpenFile>>,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            slots: alloc::vec![None; OPEN_MAX_COUNT],
        }
    }

    /// Binds the lowest free handle to directory slot `dir_index`.
    pub fn open(&mut self, dir_index: usize) -> Result<Fd> {
        let fd = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::TooManyOpenFiles)?;
        self.slots[fd] = Some(OpenFile {
            dir_index,
            offset: 0,
        });
        Ok(Fd(fd))
    }

    pub fn close(&mut self, fd: Fd) -> Result<()> {
        self.slots
            .get_mut(fd.0)
            .and_then(Option::take)
            .map(|_| ())
            .ok_or(FsError::InvalidHandle)
    }

    pub fn get(&self, fd: Fd) -> Result<&OpenFile> {
        self.slots
            .get(fd.0)
            .and_then(Option::as_ref)
            .ok_or(FsError::InvalidHandle)
    }

    pub fn get_mut(&mut self, fd: Fd) -> Result<&mut OpenFile> {
        self.slots
            .get_mut(fd.0)
            .and_then(Option::as_mut)
            .ok_or(FsError::InvalidHandle)
    }

    /// Whether any handle refers to directory slot `dir_index`.
    pub fn is_open(&self, dir_index: usize) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|file| file.dir_index == dir_index)
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
