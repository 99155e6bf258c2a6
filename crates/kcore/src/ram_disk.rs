use block_io::{BlockDevice, BlockNo, DeviceNo};
use host_sync::SpinLock;
use kcore_params::BLOCK_SIZE;

/// Errors reported by [`RamDisk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RamDiskError {
    #[error("no such device: {0}")]
    UnknownDevice(DeviceNo),
    #[error("block {block_no} out of range (disk has {size} blocks)")]
    OutOfRange { block_no: BlockNo, size: usize },
}

struct RamBlock {
    data: Box<[u8; BLOCK_SIZE]>,
    reads: usize,
    writes: usize,
}

/// An in-memory block device.
///
/// The disk answers to a single device number and keeps per-block transfer
/// counters, so callers can observe how often the cache really hit the
/// device.
pub struct RamDisk {
    dev: DeviceNo,
    blocks: Box<[SpinLock<RamBlock>]>,
}

impl RamDisk {
    /// Creates a zero-filled disk of `size` blocks for device `dev`.
    #[must_use]
    pub fn new(dev: DeviceNo, size: usize) -> Self {
        let blocks = (0..size)
            .map(|_| {
                SpinLock::new(RamBlock {
                    data: Box::new([0; BLOCK_SIZE]),
                    reads: 0,
                    writes: 0,
                })
            })
            .collect();
        log::debug!("ram disk {dev}: {size} blocks of {BLOCK_SIZE} bytes");
        Self { dev, blocks }
    }

    #[must_use]
    pub fn dev(&self) -> DeviceNo {
        self.dev
    }

    /// Returns the number of blocks on the disk.
    #[must_use]
    pub fn size(&self) -> usize {
        self.blocks.len()
    }

    fn block(
        &self,
        dev: DeviceNo,
        block_no: BlockNo,
    ) -> Result<&SpinLock<RamBlock>, RamDiskError> {
        if dev != self.dev {
            return Err(RamDiskError::UnknownDevice(dev));
        }
        self.blocks
            .get(block_no.as_index())
            .ok_or(RamDiskError::OutOfRange {
                block_no,
                size: self.blocks.len(),
            })
    }

    /// Returns how many times the block has been read from the disk.
    pub fn read_count(&self, block_no: BlockNo) -> Result<usize, RamDiskError> {
        Ok(self.block(self.dev, block_no)?.lock().reads)
    }

    /// Returns how many times the block has been written to the disk.
    pub fn write_count(&self, block_no: BlockNo) -> Result<usize, RamDiskError> {
        Ok(self.block(self.dev, block_no)?.lock().writes)
    }

    /// Returns a copy of the block as stored on the disk.
    ///
    /// Does not count as a read.
    pub fn contents(&self, block_no: BlockNo) -> Result<[u8; BLOCK_SIZE], RamDiskError> {
        Ok(*self.block(self.dev, block_no)?.lock().data)
    }
}

impl BlockDevice<BLOCK_SIZE> for RamDisk {
    type Error = RamDiskError;

    fn read(
        &self,
        dev: DeviceNo,
        block_no: BlockNo,
        data: &mut [u8; BLOCK_SIZE],
    ) -> Result<(), Self::Error> {
        let mut block = self.block(dev, block_no)?.lock();
        block.reads += 1;
        data.copy_from_slice(&*block.data);
        Ok(())
    }

    fn write(
        &self,
        dev: DeviceNo,
        block_no: BlockNo,
        data: &[u8; BLOCK_SIZE],
    ) -> Result<(), Self::Error> {
        let mut block = self.block(dev, block_no)?.lock();
        block.writes += 1;
        block.data.copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV: DeviceNo = DeviceNo::new(1);

    #[test]
    fn write_then_read() {
        let disk = RamDisk::new(DEV, 4);
        assert_eq!(disk.dev(), DEV);
        assert_eq!(disk.size(), 4);
        let block_no = BlockNo::new(3);

        disk.write(DEV, block_no, &[7; BLOCK_SIZE]).unwrap();
        let mut buf = [0; BLOCK_SIZE];
        disk.read(DEV, block_no, &mut buf).unwrap();

        assert_eq!(buf, [7; BLOCK_SIZE]);
        assert_eq!(disk.contents(block_no), Ok([7; BLOCK_SIZE]));
        assert_eq!(disk.read_count(block_no), Ok(1));
        assert_eq!(disk.write_count(block_no), Ok(1));
        assert_eq!(disk.read_count(BlockNo::new(0)), Ok(0));
    }

    #[test]
    fn rejects_foreign_device_and_out_of_range_blocks() {
        let disk = RamDisk::new(DEV, 4);
        let mut buf = [0; BLOCK_SIZE];

        assert_eq!(
            disk.read(DeviceNo::new(2), BlockNo::new(0), &mut buf),
            Err(RamDiskError::UnknownDevice(DeviceNo::new(2)))
        );
        assert_eq!(
            disk.write(DEV, BlockNo::new(4), &buf),
            Err(RamDiskError::OutOfRange {
                block_no: BlockNo::new(4),
                size: 4
            })
        );
        assert_eq!(
            RamDiskError::OutOfRange {
                block_no: BlockNo::new(4),
                size: 4
            }
            .to_string(),
            "block 4 out of range (disk has 4 blocks)"
        );
    }
}
