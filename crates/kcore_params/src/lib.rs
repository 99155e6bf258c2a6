#![no_std]

/// Bytes per physical page.
pub const PAGE_SIZE: usize = 4096;

/// Bytes per disk block.
pub const BLOCK_SIZE: usize = 1024;

/// Max # of blocks any FS op writes.
pub const MAX_OP_BLOCKS: usize = 10;

/// Number of buckets in the block cache.
pub const NBUCKET: usize = 13;

/// Buffers per block cache bucket.
pub const NBUF: usize = MAX_OP_BLOCKS * 3;

/// Device number of file system root disk.
pub const ROOT_DEV: u32 = 1;

/// Size of the RAM disk in blocks.
pub const FS_SIZE: usize = 2000;
