use alloc::{boxed::Box, vec::Vec};

use crate::{BlockNo, DeviceNo};

/// Bookkeeping of the buffers in one bucket.
///
/// This is the data behind a bucket's lock. The buffers themselves are
/// locked separately, so the table only records which block each buffer is
/// assigned to and how many holders it has.
#[derive(Debug)]
pub struct SlotTable {
    slots: Box<[Slot]>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    /// Block the buffer is assigned to.
    key: Option<(DeviceNo, BlockNo)>,
    /// Number of handles and pins on the buffer.
    ///
    /// A buffer with no reference can be recycled for another block.
    ref_count: usize,
    /// Number of pins included in `ref_count`.
    pins: usize,
    /// Bumped every time the buffer is reassigned to a block.
    generation: u64,
}

/// Outcome of [`SlotTable::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Acquired {
    /// The block was already assigned to the buffer.
    Hit(usize),
    /// An unreferenced buffer was reassigned to the block.
    Recycled(usize),
}

impl Acquired {
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Hit(index) | Self::Recycled(index) => index,
        }
    }
}

impl SlotTable {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| Slot::default()).collect::<Vec<_>>().into(),
        }
    }

    /// Takes a reference to the buffer assigned to the block.
    ///
    /// If no buffer is assigned to the block, the first unreferenced buffer
    /// is reassigned to it. Returns `None` if every buffer is referenced.
    pub(crate) fn acquire(&mut self, dev: DeviceNo, block_no: BlockNo) -> Option<Acquired> {
        let key = Some((dev, block_no));

        // Is the block already cached?
        if let Some(index) = self.slots.iter().position(|slot| slot.key == key) {
            self.slots[index].ref_count += 1;
            return Some(Acquired::Hit(index));
        }

        // Not cached.
        // Recycle the first unreferenced buffer.
        let index = self.slots.iter().position(|slot| slot.ref_count == 0)?;
        let slot = &mut self.slots[index];
        debug_assert_eq!(slot.pins, 0);
        slot.key = key;
        slot.ref_count = 1;
        slot.generation += 1;
        Some(Acquired::Recycled(index))
    }

    /// Takes one more reference to a buffer that is already referenced.
    pub(crate) fn take_ref(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        assert!(slot.ref_count > 0, "taking a reference to an unreferenced buffer");
        slot.ref_count += 1;
    }

    /// Drops one reference to a buffer and returns the remaining count.
    pub(crate) fn drop_ref(&mut self, index: usize) -> usize {
        let slot = &mut self.slots[index];
        assert!(slot.ref_count > 0, "buffer reference count underflow");
        slot.ref_count -= 1;
        slot.ref_count
    }

    /// Takes a reference on behalf of a pin.
    pub(crate) fn pin(&mut self, index: usize) {
        self.take_ref(index);
        self.slots[index].pins += 1;
    }

    /// Drops a reference taken by [`pin`](Self::pin).
    ///
    /// Returns `false`, leaving the counts untouched, if the buffer has no
    /// pin.
    pub(crate) fn unpin(&mut self, index: usize) -> bool {
        let slot = &mut self.slots[index];
        if slot.pins == 0 {
            return false;
        }
        slot.pins -= 1;
        self.drop_ref(index);
        true
    }

    pub(crate) fn ref_count(&self, index: usize) -> usize {
        self.slots[index].ref_count
    }

    /// Returns how many times the buffer has been reassigned.
    ///
    /// Data cached under an older generation belongs to another block.
    pub(crate) fn generation(&self, index: usize) -> u64 {
        self.slots[index].generation
    }

    /// Returns `true` if a buffer is assigned to the block.
    pub(crate) fn contains(&self, dev: DeviceNo, block_no: BlockNo) -> bool {
        let key = Some((dev, block_no));
        self.slots.iter().any(|slot| slot.key == key)
    }

    /// Returns the number of buffers in the bucket.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV: DeviceNo = DeviceNo::new(1);

    fn block(n: u32) -> BlockNo {
        BlockNo::new(n)
    }

    #[test]
    fn hit_takes_another_reference() {
        let mut table = SlotTable::new(2);
        assert_eq!(table.len(), 2);
        assert!(!table.is_empty());
        assert_eq!(table.acquire(DEV, block(4)), Some(Acquired::Recycled(0)));
        assert_eq!(table.acquire(DEV, block(4)), Some(Acquired::Hit(0)));
        assert_eq!(table.ref_count(0), 2);
        assert_eq!(table.ref_count(1), 0);
    }

    #[test]
    fn device_is_part_of_the_key() {
        let mut table = SlotTable::new(2);
        let other = DeviceNo::new(2);
        assert_eq!(table.acquire(DEV, block(4)), Some(Acquired::Recycled(0)));
        assert_eq!(table.acquire(other, block(4)), Some(Acquired::Recycled(1)));
        assert!(table.contains(DEV, block(4)));
        assert!(table.contains(other, block(4)));
    }

    #[test]
    fn first_unreferenced_buffer_is_recycled() {
        let mut table = SlotTable::new(3);
        for n in 0..3 {
            table.acquire(DEV, block(n)).unwrap();
        }
        assert_eq!(table.acquire(DEV, block(9)), None);

        assert_eq!(table.drop_ref(2), 0);
        assert_eq!(table.drop_ref(1), 0);
        assert_eq!(table.acquire(DEV, block(9)), Some(Acquired::Recycled(1)));
        assert!(!table.contains(DEV, block(1)));
        // buffer 2 still holds block 2 until it is recycled
        assert_eq!(table.acquire(DEV, block(2)), Some(Acquired::Hit(2)));
    }

    #[test]
    fn referenced_buffer_is_never_recycled() {
        let mut table = SlotTable::new(1);
        table.acquire(DEV, block(0)).unwrap();
        table.take_ref(0);
        assert_eq!(table.drop_ref(0), 1);
        assert_eq!(table.acquire(DEV, block(1)), None);
        assert!(table.contains(DEV, block(0)));
    }

    #[test]
    fn recycling_bumps_generation() {
        let mut table = SlotTable::new(1);
        assert_eq!(table.acquire(DEV, block(0)), Some(Acquired::Recycled(0)));
        let first = table.generation(0);

        // a hit keeps the generation
        assert_eq!(table.acquire(DEV, block(0)), Some(Acquired::Hit(0)));
        assert_eq!(table.generation(0), first);

        table.drop_ref(0);
        table.drop_ref(0);
        assert_eq!(table.acquire(DEV, block(1)), Some(Acquired::Recycled(0)));
        assert_ne!(table.generation(0), first);
    }

    #[test]
    fn unpin_only_drops_pins() {
        let mut table = SlotTable::new(1);
        table.acquire(DEV, block(0)).unwrap();
        table.take_ref(0);
        assert!(!table.unpin(0));
        assert_eq!(table.ref_count(0), 2);

        table.pin(0);
        assert_eq!(table.ref_count(0), 3);
        assert!(table.unpin(0));
        assert!(!table.unpin(0));
        assert_eq!(table.ref_count(0), 2);
    }

    #[test]
    #[should_panic(expected = "buffer reference count underflow")]
    fn drop_ref_underflow() {
        let mut table = SlotTable::new(1);
        table.drop_ref(0);
    }
}
