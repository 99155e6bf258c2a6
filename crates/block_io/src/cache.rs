use alloc::{boxed::Box, vec::Vec};

use dataview::{Pod, PodMethods as _};
use mutex_api::{HoldingMutex, Mutex};

use crate::{
    BlockDevice, BlockNo, DeviceNo,
    bucket::{Acquired, SlotTable},
};

/// A sharded cache for block I/O.
///
/// `BucketMutex` guards the bookkeeping of one bucket and is only held for
/// short, non-blocking sections. `BlockMutex` guards one buffer and is held
/// across device I/O, so it should be a lock that puts waiters to sleep.
/// A bucket lock may be taken while a buffer is locked, never the other way
/// around.
pub struct BlockIoCache<Device, BucketMutex, BlockMutex> {
    device: Device,
    buckets: Box<[Bucket<BucketMutex, BlockMutex>]>,
}

struct Bucket<BucketMutex, BlockMutex> {
    slots: BucketMutex,
    blocks: Box<[BlockMutex]>,
}

/// A cached data of a block.
pub struct BlockData<const BLOCK_SIZE: usize> {
    /// Assignment of the buffer the data was cached under.
    generation: u64,
    /// Has data been read from disk?
    valid: bool,
    data: Box<[u8; BLOCK_SIZE]>,
}

impl<const BLOCK_SIZE: usize> Default for BlockData<BLOCK_SIZE> {
    fn default() -> Self {
        Self {
            generation: 0,
            valid: false,
            data: Box::new([0; BLOCK_SIZE]),
        }
    }
}

/// A counted reference to a cached block.
///
/// While a `BlockRef` (or a [`BlockGuard`] made from it) is alive, the
/// buffer stays assigned to its block. Cloning takes another reference and
/// dropping releases one.
pub struct BlockRef<'cache, Device, BucketMutex, BlockMutex>
where
    BucketMutex: Mutex<Data = SlotTable>,
{
    dev: DeviceNo,
    block_no: BlockNo,
    bucket: usize,
    slot: usize,
    generation: u64,
    cache: &'cache BlockIoCache<Device, BucketMutex, BlockMutex>,
}

/// A locked buffer providing exclusive access to a cached block.
///
/// `VALID` tells whether the buffer is known to hold the block's data.
pub struct BlockGuard<
    'cache,
    Device,
    BucketMutex,
    BlockMutex,
    const BLOCK_SIZE: usize,
    const VALID: bool,
> where
    BucketMutex: Mutex<Data = SlotTable>,
    BlockMutex: Mutex<Data = BlockData<BLOCK_SIZE>> + 'cache,
{
    // Declared first so that the buffer is unlocked before its reference
    // is dropped.
    data: BlockMutex::Guard<'cache>,
    block: BlockRef<'cache, Device, BucketMutex, BlockMutex>,
}

impl<Device, BucketMutex, BlockMutex, const BLOCK_SIZE: usize>
    BlockIoCache<Device, BucketMutex, BlockMutex>
where
    BucketMutex: Mutex<Data = SlotTable>,
    BlockMutex: Mutex<Data = BlockData<BLOCK_SIZE>>,
{
    /// Creates a cache of `num_buckets` buckets holding `bucket_size`
    /// buffers each.
    ///
    /// # Panics
    ///
    /// Panics if `num_buckets` or `bucket_size` is `0`.
    pub fn new(device: Device, num_buckets: usize, bucket_size: usize) -> Self {
        assert!(num_buckets > 0, "block cache needs at least one bucket");
        assert!(bucket_size > 0, "block cache bucket needs at least one buffer");

        let buckets = (0..num_buckets)
            .map(|_| Bucket {
                slots: BucketMutex::new(SlotTable::new(bucket_size)),
                blocks: (0..bucket_size)
                    .map(|_| BlockMutex::new(BlockData::default()))
                    .collect::<Vec<_>>()
                    .into(),
            })
            .collect::<Vec<_>>()
            .into();

        log::debug!(
            "block cache: {num_buckets} buckets x {bucket_size} buffers of {BLOCK_SIZE} bytes"
        );

        Self { device, buckets }
    }
}

impl<Device, BucketMutex, BlockMutex> BlockIoCache<Device, BucketMutex, BlockMutex>
where
    BucketMutex: Mutex<Data = SlotTable>,
{
    /// Returns the device backing the cache.
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket_size(&self) -> usize {
        self.buckets[0].blocks.len()
    }

    fn bucket_index(&self, block_no: BlockNo) -> usize {
        block_no.as_index() % self.buckets.len()
    }

    /// Returns `true` if a buffer is currently assigned to the block.
    pub fn is_cached(&self, dev: DeviceNo, block_no: BlockNo) -> bool {
        let bucket = &self.buckets[self.bucket_index(block_no)];
        bucket.slots.lock().contains(dev, block_no)
    }

    /// Returns a reference to the cached block.
    ///
    /// If the block is cached, returns a reference to its buffer.
    /// Otherwise, recycles the first unreferenced buffer of the block's
    /// bucket. If every buffer in the bucket is referenced, returns `None`.
    ///
    /// The buffer is not locked and its data is not read.
    pub fn try_get(
        &self,
        dev: DeviceNo,
        block_no: BlockNo,
    ) -> Option<BlockRef<'_, Device, BucketMutex, BlockMutex>> {
        let bucket = self.bucket_index(block_no);
        let acquired = {
            let mut slots = self.buckets[bucket].slots.lock();
            slots
                .acquire(dev, block_no)
                .map(|acquired| (acquired, slots.generation(acquired.index())))
        };

        let Some((acquired, generation)) = acquired else {
            log::trace!("block cache: bucket {bucket} exhausted for {dev}:{block_no}");
            return None;
        };
        if let Acquired::Recycled(slot) = acquired {
            log::trace!("block cache: {dev}:{block_no} assigned to buffer {bucket}.{slot}");
        }

        Some(BlockRef {
            dev,
            block_no,
            bucket,
            slot: acquired.index(),
            generation,
            cache: self,
        })
    }

    /// Returns a reference to the cached block.
    ///
    /// Same as [`try_get`](Self::try_get), but a saturated bucket is fatal.
    ///
    /// # Panics
    ///
    /// Panics if all buffers of the block's bucket are referenced.
    pub fn get(
        &self,
        dev: DeviceNo,
        block_no: BlockNo,
    ) -> BlockRef<'_, Device, BucketMutex, BlockMutex> {
        let Some(block) = self.try_get(dev, block_no) else {
            panic!("block buffer exhausted: no free buffer for {dev}:{block_no}");
        };
        block
    }
}

impl<Device, BucketMutex, BlockMutex, const BLOCK_SIZE: usize>
    BlockIoCache<Device, BucketMutex, BlockMutex>
where
    Device: BlockDevice<BLOCK_SIZE>,
    BucketMutex: Mutex<Data = SlotTable>,
    BlockMutex: Mutex<Data = BlockData<BLOCK_SIZE>>,
{
    /// Returns a locked buffer with the contents of the block.
    ///
    /// The device is read only if the buffer does not hold the block's data
    /// yet. On a device error the buffer is released again.
    ///
    /// # Panics
    ///
    /// Panics if all buffers of the block's bucket are referenced.
    pub fn read_block(
        &self,
        dev: DeviceNo,
        block_no: BlockNo,
    ) -> Result<BlockGuard<'_, Device, BucketMutex, BlockMutex, BLOCK_SIZE, true>, Device::Error>
    {
        self.get(dev, block_no).lock().read().map_err(|(_block, e)| e)
    }
}

impl<'cache, Device, BucketMutex, BlockMutex> BlockRef<'cache, Device, BucketMutex, BlockMutex>
where
    BucketMutex: Mutex<Data = SlotTable>,
{
    fn slots(&self) -> &'cache BucketMutex {
        &self.cache.buckets[self.bucket].slots
    }

    /// Returns the device number of the block.
    pub fn dev(&self) -> DeviceNo {
        self.dev
    }

    /// Returns the block number.
    pub fn block_no(&self) -> BlockNo {
        self.block_no
    }

    /// Returns the number of references and pins on the buffer.
    pub fn ref_count(&self) -> usize {
        self.slots().lock().ref_count(self.slot)
    }

    /// Pins the block so that its buffer is not recycled after every
    /// handle has been dropped.
    pub fn pin(&self) {
        self.slots().lock().pin(self.slot);
    }

    /// Removes a pin placed by [`pin`](Self::pin).
    ///
    /// # Panics
    ///
    /// Panics if the block has no pin to remove.
    pub fn unpin(&self) {
        let unpinned = self.slots().lock().unpin(self.slot);
        assert!(
            unpinned,
            "unpin: block {}:{} is not pinned",
            self.dev,
            self.block_no
        );
    }

    /// Acquires the buffer's lock and provides exclusive access to it.
    ///
    /// Sleeps until the lock is available.
    pub fn lock<const BLOCK_SIZE: usize>(
        self,
    ) -> BlockGuard<'cache, Device, BucketMutex, BlockMutex, BLOCK_SIZE, false>
    where
        BlockMutex: Mutex<Data = BlockData<BLOCK_SIZE>> + 'cache,
    {
        let cache = self.cache;
        let mut data = cache.buckets[self.bucket].blocks[self.slot].lock();

        if data.generation != self.generation {
            // the buffer has been recycled since the data was cached
            data.generation = self.generation;
            data.valid = false;
        }

        BlockGuard { data, block: self }
    }
}

impl<Device, BucketMutex, BlockMutex> Clone for BlockRef<'_, Device, BucketMutex, BlockMutex>
where
    BucketMutex: Mutex<Data = SlotTable>,
{
    fn clone(&self) -> Self {
        self.slots().lock().take_ref(self.slot);
        Self {
            dev: self.dev,
            block_no: self.block_no,
            bucket: self.bucket,
            slot: self.slot,
            generation: self.generation,
            cache: self.cache,
        }
    }
}

impl<Device, BucketMutex, BlockMutex> Drop for BlockRef<'_, Device, BucketMutex, BlockMutex>
where
    BucketMutex: Mutex<Data = SlotTable>,
{
    fn drop(&mut self) {
        self.slots().lock().drop_ref(self.slot);
    }
}

impl<'cache, Device, BucketMutex, BlockMutex, const BLOCK_SIZE: usize, const VALID: bool>
    BlockGuard<'cache, Device, BucketMutex, BlockMutex, BLOCK_SIZE, VALID>
where
    BucketMutex: Mutex<Data = SlotTable>,
    BlockMutex: Mutex<Data = BlockData<BLOCK_SIZE>> + 'cache,
{
    /// Returns the device number of the block.
    pub fn dev(&self) -> DeviceNo {
        self.block.dev
    }

    /// Returns the block number.
    pub fn block_no(&self) -> BlockNo {
        self.block.block_no
    }

    /// Returns another reference to the block.
    pub fn block(&self) -> BlockRef<'cache, Device, BucketMutex, BlockMutex> {
        self.block.clone()
    }

    /// Returns the number of references and pins on the buffer.
    pub fn ref_count(&self) -> usize {
        self.block.ref_count()
    }

    /// See [`BlockRef::pin`].
    pub fn pin(&self) {
        self.block.pin();
    }

    /// See [`BlockRef::unpin`].
    pub fn unpin(&self) {
        self.block.unpin();
    }

    /// Returns `true` if the buffer holds the block's data.
    pub fn is_valid(&self) -> bool {
        self.data.valid
    }

    fn into_valid(self) -> BlockGuard<'cache, Device, BucketMutex, BlockMutex, BLOCK_SIZE, true> {
        assert!(self.data.valid);
        BlockGuard {
            data: self.data,
            block: self.block,
        }
    }

    /// Sets the whole block data.
    ///
    /// # Panics
    ///
    /// Panics if `data` is not exactly one block long.
    pub fn set_data(
        mut self,
        data: &[u8],
    ) -> BlockGuard<'cache, Device, BucketMutex, BlockMutex, BLOCK_SIZE, true> {
        self.data.data.copy_from_slice(data);
        self.data.valid = true;
        self.into_valid()
    }

    /// Fills the whole block data with zero.
    pub fn zeroed(mut self) -> BlockGuard<'cache, Device, BucketMutex, BlockMutex, BLOCK_SIZE, true> {
        self.data.data.fill(0);
        self.data.valid = true;
        self.into_valid()
    }

    /// Returns a valid guard if the buffer already holds the block's data.
    pub fn try_validate(
        self,
    ) -> Result<BlockGuard<'cache, Device, BucketMutex, BlockMutex, BLOCK_SIZE, true>, Self> {
        if self.data.valid {
            Ok(self.into_valid())
        } else {
            Err(self)
        }
    }
}

impl<'cache, Device, BucketMutex, BlockMutex, const BLOCK_SIZE: usize, const VALID: bool>
    BlockGuard<'cache, Device, BucketMutex, BlockMutex, BLOCK_SIZE, VALID>
where
    Device: BlockDevice<BLOCK_SIZE>,
    BucketMutex: Mutex<Data = SlotTable>,
    BlockMutex: Mutex<Data = BlockData<BLOCK_SIZE>> + 'cache,
{
    /// Reads the block from disk if cached data is not valid.
    #[expect(clippy::type_complexity)]
    pub fn read(
        mut self,
    ) -> Result<
        BlockGuard<'cache, Device, BucketMutex, BlockMutex, BLOCK_SIZE, true>,
        (Self, Device::Error),
    > {
        if !self.data.valid {
            let cache = self.block.cache;
            let (dev, block_no) = (self.block.dev, self.block.block_no);
            if let Err(e) = cache.device.read(dev, block_no, &mut self.data.data) {
                return Err((self, e));
            }
            self.data.valid = true;
            log::trace!("block cache: read {dev}:{block_no} from device");
        }
        Ok(self.into_valid())
    }
}

impl<'cache, Device, BucketMutex, BlockMutex, const BLOCK_SIZE: usize, const VALID: bool>
    BlockGuard<'cache, Device, BucketMutex, BlockMutex, BLOCK_SIZE, VALID>
where
    BucketMutex: Mutex<Data = SlotTable>,
    BlockMutex: HoldingMutex<Data = BlockData<BLOCK_SIZE>> + 'cache,
{
    /// Unlocks the buffer and drops this reference to it.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the buffer's lock.
    pub fn release(self) {
        let block = &self.block;
        assert!(
            block.cache.buckets[block.bucket].blocks[block.slot].holding(),
            "release: lock of block {}:{} not held",
            block.dev,
            block.block_no
        );
        drop(self);
    }
}

impl<'cache, Device, BucketMutex, BlockMutex, const BLOCK_SIZE: usize>
    BlockGuard<'cache, Device, BucketMutex, BlockMutex, BLOCK_SIZE, true>
where
    BucketMutex: Mutex<Data = SlotTable>,
    BlockMutex: Mutex<Data = BlockData<BLOCK_SIZE>> + 'cache,
{
    /// Returns a reference to the bytes of block cache.
    pub fn bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.data.data
    }

    /// Returns a mutable reference to the bytes of block cache.
    pub fn bytes_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        &mut self.data.data
    }

    /// Returns a reference to the block data as POD.
    pub fn data<T>(&self) -> &T
    where
        T: Pod,
    {
        self.bytes().as_data_view().get(0)
    }

    /// Returns a mutable reference to the block data as POD.
    pub fn data_mut<T>(&mut self) -> &mut T
    where
        T: Pod,
    {
        self.bytes_mut().as_data_view_mut().get_mut(0)
    }
}

impl<'cache, Device, BucketMutex, BlockMutex, const BLOCK_SIZE: usize>
    BlockGuard<'cache, Device, BucketMutex, BlockMutex, BLOCK_SIZE, true>
where
    Device: BlockDevice<BLOCK_SIZE>,
    BucketMutex: Mutex<Data = SlotTable>,
    BlockMutex: HoldingMutex<Data = BlockData<BLOCK_SIZE>> + 'cache,
{
    /// Writes the block to disk.
    ///
    /// The buffer stays locked and referenced.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the buffer's lock.
    pub fn write(&self) -> Result<(), Device::Error> {
        let block = &self.block;
        assert!(
            block.cache.buckets[block.bucket].blocks[block.slot].holding(),
            "write: lock of block {}:{} not held",
            block.dev,
            block.block_no
        );
        block
            .cache
            .device
            .write(block.dev, block.block_no, &self.data.data)
    }
}
