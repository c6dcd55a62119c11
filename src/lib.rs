//! Tinyfat is a single-volume, FAT-style file system that lives entirely in user space
//! on top of a fixed-block-size virtual disk. One flat root directory, no permissions,
//! no timestamps.
//!
//! Tinyfat's linear layout:
//! - Superblock            (block 0)
//! - File Allocation Table (blocks 1..=fat_blocks)
//! - Root Directory        (1 block)
//! - Data Blocks
//!
//! Tinyfat's layers (from bottom to top):
//! 1. Block Device: fixed-size block storage.                  | User implemented, or `FileDisk`
//! 2. Superblock / FAT / Directory: in-memory mirrors of the   | Fs implemented
//!    on-disk structures, loaded at mount.
//! 3. File: byte-range read/write over block chains.           | Fs implemented
//! 4. FileSystem: the mount context and open-file table.       | Fs implemented
//!
//! Consistency: the directory block is written whenever it changes, the allocation
//! table only on `unmount` and `sync` (unless `FatWriteback::Eager` is configured).
//! A process that dies in between leaves a stale allocation table on disk.

extern crate alloc;

mod config;
mod block_dev;
mod disk;
mod superblock;
mod fat;
mod directory;
mod fd;
mod file;
mod fs;
mod error;

pub use block_dev::BlockDevice;
pub use config::*;
pub use disk::FileDisk;
pub use superblock::*;
pub use fat::{Chain, Fat};
pub use directory::*;
pub use fd::{Fd, OpenFile};
pub use file::{fread, fwrite};
pub use fs::*;
pub use error::FsError as Error;
pub use error::Result;
