pub const SIGNATURE: &[u8; 8] = b"ECS150FS";

pub const BLOCK_SIZE: usize = 4096;
pub const SUPERBLOCK_ID: usize = 0; // Block ID for the superblock
pub const FAT_START: usize = 1; // First block of the allocation table

pub const FAT_EOC: u16 = 0xFFFF; // End of chain, also "no block" in a directory entry
pub const FAT_FREE: u16 = 0;
pub const FAT_ENTRY_SIZE: usize = 2;
pub const FAT_ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / FAT_ENTRY_SIZE;

pub const FILENAME_LEN: usize = 16; // Including the terminating NUL
pub const MAX_FILE_NAME_LEN: usize = FILENAME_LEN - 1;
pub const DIR_ENTRY_SIZE: usize = 32;
pub const FILE_MAX_COUNT: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;

pub const OPEN_MAX_COUNT: usize = 32;

/// When the allocation table is written back to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatWriteback {
    /// Only on `unmount` and `sync`. The on-disk table is stale in between.
    #[default]
    OnUnmount,
    /// After every operation that allocates or frees blocks.
    Eager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MountOptions {
    pub fat_writeback: FatWriteback,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fat_writeback(mut self, policy: FatWriteback) -> Self {
        self.fat_writeback = policy;
        self
    }
}
