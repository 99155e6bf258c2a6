//! Memory core of the kernel: physical pages and cached disk blocks.
//!
//! [`MemoryCore`] owns one [`PageAllocator`] and one [`BufferCache`] and wires
//! them to the hosted [`SpinLock`] and [`SleepLock`]. Everything is reached
//! through the context object; there is no global state.
//!
//! The page pool hands out 4096-byte pages with a reference count each. The
//! buffer cache keeps [`NBUF`] buffers in each of [`NBUCKET`] buckets, and a
//! block always lives in bucket `block_no % NBUCKET`.

use core::{ops::Range, ptr::NonNull};

use block_io::{BlockData, BlockDevice, BlockNo, DeviceNo, SlotTable};
use host_sync::{SleepLock, SpinLock};
use kcore_params::{BLOCK_SIZE, FS_SIZE, NBUCKET, NBUF, PAGE_SIZE, ROOT_DEV};
use page_alloc::{FreeList, MemoryInfo, PageAllocError, PageFrame, PageFrameAllocator, RefCounts};

pub use self::ram_disk::{RamDisk, RamDiskError};

mod ram_disk;

/// A physical page.
pub type Page = PageFrame<PAGE_SIZE>;

/// The physical page allocator.
pub type PageAllocator =
    PageFrameAllocator<SpinLock<FreeList<PAGE_SIZE>>, SpinLock<RefCounts>, PAGE_SIZE>;

/// The block buffer cache on top of `Device`.
pub type BufferCache<Device> =
    block_io::BlockIoCache<Device, SpinLock<SlotTable>, SleepLock<BlockData<BLOCK_SIZE>>>;

/// A counted reference to a cached block.
pub type BlockRef<'a, Device> =
    block_io::BlockRef<'a, Device, SpinLock<SlotTable>, SleepLock<BlockData<BLOCK_SIZE>>>;

/// A locked buffer holding a block's data.
pub type BlockGuard<'a, Device> = block_io::BlockGuard<
    'a,
    Device,
    SpinLock<SlotTable>,
    SleepLock<BlockData<BLOCK_SIZE>>,
    BLOCK_SIZE,
    true,
>;

/// Errors reported by the memory core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error(transparent)]
    Page(#[from] PageAllocError),
    #[error(transparent)]
    Disk(#[from] RamDiskError),
}

/// Runtime sizing of the memory core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Number of buckets in the buffer cache.
    pub num_buckets: usize,
    /// Buffers per bucket.
    pub bucket_size: usize,
    /// Size of the RAM disk in blocks.
    pub disk_blocks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_buckets: NBUCKET,
            bucket_size: NBUF,
            disk_blocks: FS_SIZE,
        }
    }
}

impl Config {
    fn validate(&self) -> Result<(), Error> {
        if self.num_buckets == 0 {
            return Err(Error::InvalidConfig("buffer cache needs at least one bucket"));
        }
        if self.bucket_size == 0 {
            return Err(Error::InvalidConfig("buffer cache bucket needs at least one buffer"));
        }
        Ok(())
    }
}

/// The page allocator and the buffer cache of one machine.
pub struct MemoryCore<Device = RamDisk> {
    pages: PageAllocator,
    blocks: BufferCache<Device>,
}

impl MemoryCore<RamDisk> {
    /// Creates a memory core whose buffer cache sits on a RAM disk of
    /// `config.disk_blocks` blocks answering to [`ROOT_DEV`].
    ///
    /// # Safety
    ///
    /// Same as [`MemoryCore::new`].
    pub unsafe fn with_ram_disk(
        config: &Config,
        pa_range: Range<NonNull<u8>>,
    ) -> Result<Self, Error> {
        let disk = RamDisk::new(DeviceNo::new(ROOT_DEV), config.disk_blocks);
        unsafe { Self::new(config, pa_range, disk) }
    }
}

impl<Device> MemoryCore<Device> {
    /// Creates a memory core managing the pages in `pa_range` and caching
    /// the blocks of `device`.
    ///
    /// # Safety
    ///
    /// `pa_range` must be valid for reads and writes and must not be used by
    /// anything else for the lifetime of the memory core.
    pub unsafe fn new(
        config: &Config,
        pa_range: Range<NonNull<u8>>,
        device: Device,
    ) -> Result<Self, Error> {
        config.validate()?;

        let pages = unsafe { PageAllocator::new(pa_range) };
        let blocks = BufferCache::new(device, config.num_buckets, config.bucket_size);
        log::debug!(
            "memory core: {} pages, {} block buffers",
            pages.total_pages(),
            config.num_buckets * config.bucket_size
        );

        Ok(Self { pages, blocks })
    }

    /// Returns the physical page allocator.
    #[must_use]
    pub fn pages(&self) -> &PageAllocator {
        &self.pages
    }

    /// Returns the block buffer cache.
    #[must_use]
    pub fn blocks(&self) -> &BufferCache<Device> {
        &self.blocks
    }

    /// Returns the device the buffer cache reads from.
    #[must_use]
    pub fn device(&self) -> &Device {
        self.blocks.device()
    }

    /// Retrieves usage of the physical page pool.
    #[must_use]
    pub fn memory_info(&self) -> MemoryInfo {
        self.pages.info()
    }

    /// Allocates one page, filled with junk.
    pub fn alloc_page(&self) -> Result<Page, Error> {
        Ok(self.pages.alloc()?)
    }

    /// Allocates one zero-filled page.
    pub fn alloc_zeroed_page(&self) -> Result<Page, Error> {
        Ok(self.pages.alloc_zeroed()?)
    }

    /// Drops one reference to the page, returning it to the pool with the
    /// last one.
    ///
    /// # Safety
    ///
    /// Same as [`PageFrameAllocator::free`].
    pub unsafe fn free_page(&self, page: Page) {
        unsafe { self.pages.free(page) }
    }
}

impl<Device> MemoryCore<Device>
where
    Device: BlockDevice<BLOCK_SIZE>,
    Error: From<Device::Error>,
{
    /// Returns a locked buffer with the contents of block `block_no` on the
    /// root device.
    ///
    /// # Panics
    ///
    /// Panics if every buffer of the block's bucket is in use.
    pub fn read_block(&self, block_no: BlockNo) -> Result<BlockGuard<'_, Device>, Error> {
        Ok(self.blocks.read_block(DeviceNo::new(ROOT_DEV), block_no)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_follows_params() {
        let config = Config::default();
        assert_eq!(config.num_buckets, 13);
        assert_eq!(config.bucket_size, 30);
        assert_eq!(config.disk_blocks, 2000);
    }

    #[test]
    fn rejects_empty_cache() {
        let config = Config {
            num_buckets: 0,
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(Error::InvalidConfig("buffer cache needs at least one bucket"))
        );

        let config = Config {
            bucket_size: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn errors_convert() {
        let err = Error::from(PageAllocError::NoFreePage);
        assert_eq!(err.to_string(), "no free page");

        let err = Error::from(RamDiskError::UnknownDevice(DeviceNo::new(3)));
        assert_eq!(err.to_string(), "no such device: 3");
    }
}
