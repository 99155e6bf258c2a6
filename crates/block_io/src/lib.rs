//! Sharded cache for block I/O.
//!
//! The cache holds a fixed number of block buffers split into buckets. A
//! block always maps to bucket `block_no % bucket_count`, and each bucket has
//! its own lock, so lookups of blocks in different buckets never contend.
//!
//! Interface:
//!
//! * To get a locked buffer with the contents of a block, call
//!   [`BlockIoCache::read_block`].
//! * After changing buffer data, call [`BlockGuard::write`] to write it to
//!   disk.
//! * When done with the buffer, call [`BlockGuard::release`] (or drop it).
//! * Only one thread at a time can use a buffer, so do not keep it locked
//!   longer than necessary.
//! * To keep a block cached between uses, [`pin`](BlockRef::pin) it.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use core::fmt;

mod bucket;
mod cache;

pub use self::{
    bucket::SlotTable,
    cache::{BlockData, BlockGuard, BlockIoCache, BlockRef},
};

/// A trait representing a block device with a fixed block size.
///
/// # Constants
///
/// * `BLOCK_SIZE`: The size of each block in bytes.
pub trait BlockDevice<const BLOCK_SIZE: usize> {
    /// The error type that can be returned by the block device operations.
    type Error;

    /// Reads block `block_no` of device `dev` into the provided buffer.
    ///
    /// Blocks the calling thread until the transfer completes.
    fn read(
        &self,
        dev: DeviceNo,
        block_no: BlockNo,
        data: &mut [u8; BLOCK_SIZE],
    ) -> Result<(), Self::Error>;

    /// Writes the provided buffer to block `block_no` of device `dev`.
    ///
    /// Blocks the calling thread until the transfer completes.
    fn write(
        &self,
        dev: DeviceNo,
        block_no: BlockNo,
        data: &[u8; BLOCK_SIZE],
    ) -> Result<(), Self::Error>;
}

/// Device number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceNo(u32);

impl fmt::Display for DeviceNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DeviceNo {
    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

/// Block number on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockNo(u32);

impl fmt::Display for BlockNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl BlockNo {
    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn as_index(&self) -> usize {
        self.0 as usize
    }
}
