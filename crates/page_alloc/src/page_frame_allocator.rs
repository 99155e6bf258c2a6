use core::{ops::Range, ptr::NonNull};

use mutex_api::Mutex;

use crate::{
    FreeList, MemoryInfo, PageAllocError, PageFrame,
    ref_table::{FIRST_RELEASE, PageRefTable, RefCounts},
};

/// Byte written over a page when it is handed out.
pub const ALLOC_JUNK: u8 = 5;

/// Byte written over a page when it goes back to the free list.
pub const FREE_JUNK: u8 = 1;

/// A page allocator with per-page reference counts.
///
/// Free pages are kept on a [`FreeList`] behind `FreeListMutex`; the
/// reference counts live in a [`PageRefTable`] behind `RefMutex`. The two
/// locks are never held at the same time, so sharing a page (which only
/// touches the reference table) does not contend with allocation.
pub struct PageFrameAllocator<FreeListMutex, RefMutex, const PAGE_SIZE: usize> {
    /// The range of physical memory handed out as pages.
    heap: Range<NonNull<u8>>,
    /// The total number of pages managed by the allocator.
    total_pages: usize,
    free_list: FreeListMutex,
    refs: PageRefTable<RefMutex, PAGE_SIZE>,
}

unsafe impl<FreeListMutex, RefMutex, const PAGE_SIZE: usize> Send
    for PageFrameAllocator<FreeListMutex, RefMutex, PAGE_SIZE>
where
    FreeListMutex: Send,
    RefMutex: Send,
{
}

unsafe impl<FreeListMutex, RefMutex, const PAGE_SIZE: usize> Sync
    for PageFrameAllocator<FreeListMutex, RefMutex, PAGE_SIZE>
where
    FreeListMutex: Sync,
    RefMutex: Sync,
{
}

impl<FreeListMutex, RefMutex, const PAGE_SIZE: usize>
    PageFrameAllocator<FreeListMutex, RefMutex, PAGE_SIZE>
where
    FreeListMutex: Mutex<Data = FreeList<PAGE_SIZE>>,
    RefMutex: Mutex<Data = RefCounts>,
{
    /// Creates an allocator that manages the given range of physical memory.
    ///
    /// The reference table is placed at the start of the range, and every
    /// whole page after it is released to the free list.
    ///
    /// # Safety
    ///
    /// The given range of physical memory must be valid for reads and writes
    /// and must not be used by anything else for the lifetime of the
    /// allocator.
    ///
    /// # Panics
    ///
    /// Panics if the range cannot hold the reference table and at least one
    /// page.
    pub unsafe fn new(pa_range: Range<NonNull<u8>>) -> Self {
        let Range { start, end } = pa_range;
        assert!(start <= end, "invalid physical memory range");

        let start_addr = start.addr().get();
        let table_start = start_addr.next_multiple_of(align_of::<i32>());
        let heap_end = end.addr().get() / PAGE_SIZE * PAGE_SIZE;

        let max_pages = heap_end.saturating_sub(table_start) / PAGE_SIZE;
        assert!(
            max_pages > 0,
            "physical memory range {start_addr:#x}..{heap_end:#x} holds no page"
        );

        let table_end = table_start + max_pages * size_of::<i32>();
        let heap_start = table_end.next_multiple_of(PAGE_SIZE);
        assert!(
            heap_start < heap_end,
            "physical memory range {start_addr:#x}..{heap_end:#x} too small for reference table"
        );

        let counts = unsafe {
            let table = start.byte_add(table_start - start_addr).cast::<i32>();
            RefCounts::init(table, max_pages)
        };
        let heap = unsafe {
            start.byte_add(heap_start - start_addr)..start.byte_add(heap_end - start_addr)
        };

        let allocator = Self {
            refs: PageRefTable::new(heap.start, counts),
            free_list: FreeListMutex::new(FreeList::new()),
            total_pages: (heap_end - heap_start) / PAGE_SIZE,
            heap,
        };

        // Release from the top so that the lowest page sits at the head.
        let mut p = allocator.heap.end;
        while p > allocator.heap.start {
            unsafe {
                p = p.byte_sub(PAGE_SIZE);
                allocator.free(PageFrame::from_raw(p));
            }
        }
        assert_eq!(allocator.free_pages(), allocator.total_pages);

        log::debug!(
            "page allocator: {} pages at {heap_start:#x}..{heap_end:#x}, reference table at {table_start:#x}",
            allocator.total_pages,
        );

        allocator
    }

    fn validate(&self, page: NonNull<u8>, op: &str) {
        assert_eq!(
            page.addr().get() % PAGE_SIZE,
            0,
            "{op}: unaligned page {page:p}"
        );
        assert!(
            page >= self.heap.start,
            "{op}: page {page:p} below managed memory"
        );
        assert!(
            page < self.heap.end,
            "{op}: page {page:p} above managed memory"
        );
    }

    /// Returns the total number of pages managed by the allocator.
    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Returns the number of pages on the free list.
    #[must_use]
    pub fn free_pages(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Retrieves memory information, including the number of free and total
    /// pages.
    #[must_use]
    pub fn info(&self) -> MemoryInfo {
        MemoryInfo {
            free_pages: self.free_pages(),
            total_pages: self.total_pages,
            page_size: PAGE_SIZE,
        }
    }

    /// Checks if the given pointer is a page managed by the allocator.
    #[must_use]
    pub fn is_heap_addr(&self, ptr: NonNull<u8>) -> bool {
        ptr.addr().get() % PAGE_SIZE == 0 && self.heap.contains(&ptr)
    }

    /// Allocates one page of physical memory.
    ///
    /// The page is returned with a reference count of 1 and filled with
    /// [`ALLOC_JUNK`] to surface reads of uninitialized data.
    ///
    /// # Panics
    ///
    /// Panics if the page popped from the free list was still referenced.
    pub fn alloc(&self) -> Result<PageFrame<PAGE_SIZE>, PageAllocError> {
        let Some(page) = self.free_list.lock().pop() else {
            log::warn!("page allocator: out of free pages");
            return Err(PageAllocError::NoFreePage);
        };

        let refs = self.refs.increment(page);
        assert_eq!(refs, 1, "alloc: page {page:p} has too many references");

        unsafe {
            page.write_bytes(ALLOC_JUNK, PAGE_SIZE);
        }
        log::trace!("alloc page {page:p}");
        Ok(PageFrame::from_raw(page))
    }

    /// Allocates one zeroed page of physical memory.
    pub fn alloc_zeroed(&self) -> Result<PageFrame<PAGE_SIZE>, PageAllocError> {
        let page = self.alloc()?;
        unsafe {
            page.as_non_null().write_bytes(0, PAGE_SIZE);
        }
        Ok(page)
    }

    /// Drops one reference to the page.
    ///
    /// When the last reference goes away the page is filled with
    /// [`FREE_JUNK`] to catch dangling accesses and returned to the free
    /// list. While other references remain, the page is left alone.
    ///
    /// # Safety
    ///
    /// The caller must own the reference it gives up and must not access the
    /// page through it afterwards.
    ///
    /// # Panics
    ///
    /// Panics if the page is unaligned or outside the managed memory, or if
    /// the page has no reference left to drop.
    pub unsafe fn free(&self, page: PageFrame<PAGE_SIZE>) {
        let page = page.as_non_null();
        self.validate(page, "free");

        match self.refs.decrement(page) {
            // first release while seeding the free list
            FIRST_RELEASE => self.refs.set(page, 0),
            ..0 => panic!("free: attempt to free already unreferenced page {page:p}"),
            1.. => return,
            0 => {}
        }

        unsafe {
            page.write_bytes(FREE_JUNK, PAGE_SIZE);
            self.free_list.lock().push(page);
        }
    }

    /// Takes one more reference to the page and returns the new count.
    ///
    /// # Panics
    ///
    /// Panics if the page is unaligned or outside the managed memory.
    pub fn increment_ref(&self, page: PageFrame<PAGE_SIZE>) -> i32 {
        self.validate(page.as_non_null(), "increment_ref");
        self.refs.increment(page.as_non_null())
    }

    /// Drops one reference to the page without returning it to the free
    /// list, and returns the new count.
    ///
    /// # Panics
    ///
    /// Panics if the page is unaligned or outside the managed memory.
    pub fn decrement_ref(&self, page: PageFrame<PAGE_SIZE>) -> i32 {
        self.validate(page.as_non_null(), "decrement_ref");
        self.refs.decrement(page.as_non_null())
    }

    /// Returns the current reference count of the page.
    pub fn ref_count(&self, page: PageFrame<PAGE_SIZE>) -> i32 {
        self.validate(page.as_non_null(), "ref_count");
        self.refs.get(page.as_non_null())
    }
}
