//! Per-page reference counts.

use core::{
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

use mutex_api::Mutex;

/// Reference count of a page that has never been released to the allocator.
pub const SENTINEL: i32 = -100;

/// Count observed when a never-released page is released for the first time.
pub const FIRST_RELEASE: i32 = SENTINEL - 1;

/// Storage of the reference counts, carved out of physical memory.
#[derive(Debug)]
pub struct RefCounts {
    counts: NonNull<i32>,
    len: usize,
}

unsafe impl Send for RefCounts {}

impl RefCounts {
    /// Takes `len` counters starting at `counts` and sets them all to
    /// [`SENTINEL`].
    ///
    /// # Safety
    ///
    /// `counts` must be aligned for `i32` and valid for writes of `len`
    /// counters for as long as the returned value lives, and nothing else may
    /// access that memory in the meantime.
    pub unsafe fn init(counts: NonNull<i32>, len: usize) -> Self {
        for i in 0..len {
            unsafe {
                counts.add(i).write(SENTINEL);
            }
        }
        Self { counts, len }
    }
}

impl Deref for RefCounts {
    type Target = [i32];

    fn deref(&self) -> &Self::Target {
        unsafe { NonNull::slice_from_raw_parts(self.counts, self.len).as_ref() }
    }
}

impl DerefMut for RefCounts {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { NonNull::slice_from_raw_parts(self.counts, self.len).as_mut() }
    }
}

/// A table of reference counts, one per page, behind a single lock.
///
/// Pages are identified by their address; the count of the page at
/// `base + n * PAGE_SIZE` is the `n`-th entry.
pub struct PageRefTable<RefMutex, const PAGE_SIZE: usize> {
    base: usize,
    counts: RefMutex,
}

impl<RefMutex, const PAGE_SIZE: usize> PageRefTable<RefMutex, PAGE_SIZE>
where
    RefMutex: Mutex<Data = RefCounts>,
{
    /// Creates a table covering the pages from `base` onwards.
    pub fn new(base: NonNull<u8>, counts: RefCounts) -> Self {
        assert_eq!(base.addr().get() % PAGE_SIZE, 0);
        Self {
            base: base.addr().get(),
            counts: RefMutex::new(counts),
        }
    }

    fn index(&self, page: NonNull<u8>) -> usize {
        let addr = page.addr().get();
        assert!(
            addr >= self.base,
            "page {addr:#x} below reference table base {:#x}",
            self.base
        );
        (addr - self.base) / PAGE_SIZE
    }

    /// Increments the reference count of the page and returns the new count.
    ///
    /// # Panics
    ///
    /// Panics if the page is not covered by the table.
    pub fn increment(&self, page: NonNull<u8>) -> i32 {
        let index = self.index(page);
        let mut counts = self.counts.lock();
        counts[index] += 1;
        counts[index]
    }

    /// Decrements the reference count of the page and returns the new count.
    ///
    /// The result is [`FIRST_RELEASE`] when a page that was never released
    /// before is released.
    ///
    /// # Panics
    ///
    /// Panics if the page is not covered by the table.
    pub fn decrement(&self, page: NonNull<u8>) -> i32 {
        let index = self.index(page);
        let mut counts = self.counts.lock();
        counts[index] -= 1;
        counts[index]
    }

    /// Overwrites the reference count of the page.
    pub fn set(&self, page: NonNull<u8>, count: i32) {
        let index = self.index(page);
        self.counts.lock()[index] = count;
    }

    /// Returns the current reference count of the page.
    pub fn get(&self, page: NonNull<u8>) -> i32 {
        let index = self.index(page);
        self.counts.lock()[index]
    }

    /// Returns the number of pages the table covers.
    pub fn len(&self) -> usize {
        self.counts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
