use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use std::path::Path;

use log::{debug, error};

use crate::config::*;
use crate::directory::{Directory, FileName};
use crate::disk::FileDisk;
use crate::error::{FsError, Result};
use crate::fat::Fat;
use crate::fd::{Fd, FdTable};
use crate::file::{fread, fwrite};
use crate::superblock::{read_superblock, write_superblock};
use crate::{BlockDevice, SuperBlock};

/// State that only exists while a volume is mounted.
#[derive(Debug)]
struct Mount {
    superblock: SuperBlock,
    fat: Fat,
    dir: Directory,
    fds: FdTable,
}

impl Mount {
    fn store_dir<D: BlockDevice + ?Sized>(&self, device: &D) -> Result<()> {
        self.dir.store(device, self.superblock.root_dir_block as usize)
    }
}

/// A mount context: one volume on one block device.
///
/// Every operation runs to completion on the caller's thread. Nothing here
/// locks; share a `FileSystem` between threads by wrapping it in a mutex.
#[derive(Debug)]
pub struct FileSystem<D: BlockDevice> {
    device: Arc<D>,
    options: MountOptions,
    mount: Option<Mount>,
}

/// Volume geometry and usage, as reported by `info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfo {
    pub total_blocks: usize,
    pub fat_blocks: usize,
    pub root_dir_block: usize,
    pub data_start: usize,
    pub data_blocks: usize,
    pub fat_free: usize,
    pub dir_free: usize,
}

impl fmt::Display for FsInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FS Info:")?;
        writeln!(f, "total_blk_count={}", self.total_blocks)?;
        writeln!(f, "fat_blk_count={}", self.fat_blocks)?;
        writeln!(f, "rdir_blk={}", self.root_dir_block)?;
        writeln!(f, "data_blk={}", self.data_start)?;
        writeln!(f, "data_blk_count={}", self.data_blocks)?;
        writeln!(f, "fat_free_ratio={}/{}", self.fat_free, self.data_blocks)?;
        write!(f, "rdir_free_ratio={}/{}", self.dir_free, FILE_MAX_COUNT)
    }
}

/// One `list` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub name: FileName,
    pub size: usize,
    pub first_block: Option<u16>,
}

impl fmt::Display for FileStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "file: {}, size: {}, data_blk: {}",
            self.name,
            self.size,
            self.first_block.unwrap_or(FAT_EOC)
        )
    }
}

/// Load failures are either a malformed volume or an I/O error.
fn invalid_or_io(e: FsError) -> FsError {
    match e {
        FsError::InvalidVolume => FsError::InvalidVolume,
        _ => FsError::IoError,
    }
}

impl FileSystem<FileDisk> {
    /// Opens the disk image at `path` and mounts it.
    pub fn mount_path(path: impl AsRef<Path>) -> Result<Self> {
        let disk = FileDisk::open(path).map_err(|_| FsError::InvalidVolume)?;
        Self::mount(Arc::new(disk))
    }
}

impl<D: BlockDevice> FileSystem<D> {
    /// Writes an empty volume spanning the whole device, then mounts it.
    pub fn format(device: Arc<D>) -> Result<Self> {
        let superblock = SuperBlock::new(device.num_blocks())?;
        write_superblock(&*device, &superblock)?;
        Fat::new(&superblock).store(&*device)?;
        Directory::new().store(&*device, superblock.root_dir_block as usize)?;
        device.flush()?;
        debug!(
            "formatted volume: {} blocks, {} FAT blocks, {} data blocks",
            superblock.total_blocks, superblock.fat_blocks, superblock.data_blocks
        );
        Self::mount(device)
    }

    pub fn mount(device: Arc<D>) -> Result<Self> {
        Self::mount_with(device, MountOptions::default())
    }

    /// Loads superblock, allocation table and root directory. On failure the
    /// device is closed and nothing stays allocated.
    pub fn mount_with(device: Arc<D>, options: MountOptions) -> Result<Self> {
        let mount = match Self::load(&*device) {
            Ok(mount) => mount,
            Err(e) => {
                debug!("mount failed: {}", e);
                if let Err(close_err) = device.close() {
                    error!("failed to close device after failed mount: {}", close_err);
                }
                return Err(e);
            }
        };
        debug!(
            "mounted volume: {} data blocks, {} free, {} files",
            mount.superblock.data_blocks,
            mount.fat.count_free(),
            FILE_MAX_COUNT - mount.dir.count_free()
        );
        Ok(Self {
            device,
            options,
            mount: Some(mount),
        })
    }

    fn load(device: &D) -> Result<Mount> {
        let superblock = read_superblock(device).map_err(invalid_or_io)?;
        let fat = Fat::load(device, &superblock).map_err(|_| FsError::IoError)?;
        let dir = Directory::load(device, superblock.root_dir_block as usize)
            .map_err(invalid_or_io)?;
        Ok(Mount {
            superblock,
            fat,
            dir,
            fds: FdTable::new(),
        })
    }

    /// Flushes allocation table and directory, then closes the device.
    /// Refuses while any file is open. A failed write is reported but the
    /// volume is unmounted and the device closed regardless.
    pub fn unmount(&mut self) -> Result<()> {
        let mount = self.mount.as_ref().ok_or(FsError::NotMounted)?;
        if mount.fds.open_count() > 0 {
            return Err(FsError::FilesStillOpen);
        }
        let Some(mount) = self.mount.take() else {
            return Err(FsError::NotMounted);
        };

        let device = &*self.device;
        let result = mount
            .fat
            .store(device)
            .and(mount.store_dir(device))
            .and(device.close());
        match result {
            Ok(()) => debug!("unmounted volume"),
            Err(e) => error!("unmount finished with errors: {}", e),
        }
        result.map_err(|_| FsError::IoError)
    }

    pub fn is_mounted(&self) -> bool {
        self.mount.is_some()
    }

    /// Writes the allocation table and directory without unmounting.
    pub fn sync(&mut self) -> Result<()> {
        let device = &*self.device;
        let mount = self.mount.as_ref().ok_or(FsError::NotMounted)?;
        mount.fat.store(device)?;
        mount.store_dir(device)?;
        device.flush()
    }

    pub fn info(&self) -> Result<FsInfo> {
        let mount = self.mount.as_ref().ok_or(FsError::NotMounted)?;
        let sb = &mount.superblock;
        Ok(FsInfo {
            total_blocks: sb.total_blocks as usize,
            fat_blocks: sb.fat_blocks as usize,
            root_dir_block: sb.root_dir_block as usize,
            data_start: sb.data_start as usize,
            data_blocks: sb.data_blocks as usize,
            fat_free: mount.fat.count_free(),
            dir_free: mount.dir.count_free(),
        })
    }

    pub fn create(&mut self, name: &str) -> Result<()> {
        let device = &*self.device;
        let mount = self.mount.as_mut().ok_or(FsError::NotMounted)?;
        let name = FileName::new(name)?;
        let index = mount.dir.add(name)?;
        debug!("created {} in slot {}", name, index);
        mount.store_dir(device)
    }

    /// Removes a file and returns its blocks to the free pool.
    /// The allocation table itself reaches the disk at the next sync point.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let device = &*self.device;
        let eager = self.options.fat_writeback == FatWriteback::Eager;
        let mount = self.mount.as_mut().ok_or(FsError::NotMounted)?;
        let name = FileName::new(name)?;
        let index = mount.dir.lookup(&name).ok_or(FsError::NotFound)?;
        if mount.fds.is_open(index) {
            return Err(FsError::FileOpen);
        }

        let Some(entry) = mount.dir.remove(index) else {
            return Err(FsError::NotFound);
        };
        mount.fat.free_chain(entry.first_block);
        debug!("deleted {} ({} bytes)", name, entry.size);

        mount.store_dir(device)?;
        if eager {
            mount.fat.store(device)?;
        }
        Ok(())
    }

    /// Every file in directory slot order.
    pub fn list(&self) -> Result<Vec<FileStat>> {
        let mount = self.mount.as_ref().ok_or(FsError::NotMounted)?;
        Ok(mount
            .dir
            .entries()
            .map(|(_, entry)| FileStat {
                name: entry.name,
                size: entry.size as usize,
                first_block: entry.first_block,
            })
            .collect())
    }

    /// Data blocks of `name` in chain order.
    pub fn blocks(&self, name: &str) -> Result<Vec<u16>> {
        let mount = self.mount.as_ref().ok_or(FsError::NotMounted)?;
        let name = FileName::new(name)?;
        let index = mount.dir.lookup(&name).ok_or(FsError::NotFound)?;
        let entry = mount.dir.get(index).ok_or(FsError::NotFound)?;
        Ok(mount.fat.chain(entry.first_block).collect())
    }

    pub fn open(&mut self, name: &str) -> Result<Fd> {
        let mount = self.mount.as_mut().ok_or(FsError::NotMounted)?;
        let name = FileName::new(name)?;
        let index = mount.dir.lookup(&name).ok_or(FsError::NotFound)?;
        mount.fds.open(index)
    }

    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let mount = self.mount.as_mut().ok_or(FsError::NotMounted)?;
        mount.fds.close(fd)
    }

    /// Size in bytes of the file behind `fd`.
    pub fn stat(&self, fd: Fd) -> Result<usize> {
        let mount = self.mount.as_ref().ok_or(FsError::NotMounted)?;
        let file = mount.fds.get(fd)?;
        let entry = mount.dir.get(file.dir_index).ok_or(FsError::InvalidHandle)?;
        Ok(entry.size as usize)
    }

    /// Moves the cursor. `offset == size` is allowed, anything past it is not.
    pub fn seek(&mut self, fd: Fd, offset: usize) -> Result<()> {
        let size = self.stat(fd)?;
        if offset > size {
            return Err(FsError::OffsetOutOfRange);
        }
        let mount = self.mount.as_mut().ok_or(FsError::NotMounted)?;
        mount.fds.get_mut(fd)?.offset = offset;
        Ok(())
    }

    pub fn tell(&self, fd: Fd) -> Result<usize> {
        let mount = self.mount.as_ref().ok_or(FsError::NotMounted)?;
        Ok(mount.fds.get(fd)?.offset)
    }

    /// Reads up to `buf.len()` bytes at the cursor and advances it.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let device = &*self.device;
        let mount = self.mount.as_mut().ok_or(FsError::NotMounted)?;
        let file = mount.fds.get_mut(fd)?;
        let entry = mount.dir.get(file.dir_index).ok_or(FsError::InvalidHandle)?;
        let n = fread(device, &mount.superblock, &mount.fat, entry, file.offset, buf)?;
        file.offset += n;
        Ok(n)
    }

    /// Writes `data` at the cursor and advances it. A full volume yields a
    /// short count, not an error.
    pub fn write(&mut self, fd: Fd, data: &[u8]) -> Result<usize> {
        let device = &*self.device;
        let eager = self.options.fat_writeback == FatWriteback::Eager;
        let mount = self.mount.as_mut().ok_or(FsError::NotMounted)?;
        let file = mount.fds.get_mut(fd)?;
        if data.is_empty() {
            return Ok(0);
        }
        let entry = mount.dir.get_mut(file.dir_index).ok_or(FsError::InvalidHandle)?;
        let before = *entry;
        let n = fwrite(device, &mount.superblock, &mut mount.fat, entry, file.offset, data)?;
        let changed = *entry != before;
        file.offset += n;

        if changed {
            // The in-memory directory is authoritative and is rewritten at
            // unmount, so a failed update here does not lose the bytes.
            if let Err(e) = mount.store_dir(device) {
                error!("failed to persist directory after write: {}", e);
            }
            if eager {
                if let Err(e) = mount.fat.store(device) {
                    error!("failed to persist FAT after write: {}", e);
                }
            }
        }
        Ok(n)
    }

    /// Writes all of `data`, failing with `VolumeFull` once nothing more fits.
    pub fn write_all(&mut self, fd: Fd, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            match self.write(fd, data)? {
                0 => return Err(FsError::VolumeFull),
                n => data = &data[n..],
            }
        }
        Ok(())
    }

    pub fn superblock(&self) -> Result<&SuperBlock> {
        Ok(&self.mount.as_ref().ok_or(FsError::NotMounted)?.superblock)
    }

    pub fn options(&self) -> MountOptions {
        self.options
    }

    pub fn device(&self) -> Arc<D> {
        Arc::clone(&self.device)
    }
}
