use core::ptr::NonNull;

/// Represents a single run in the free list of the page allocator.
///
/// The run lives in the first bytes of the free page itself.
struct Run {
    /// Pointer to the next run in the free list.
    next: Option<NonNull<Run>>,
}

/// A singly-linked list of free pages.
#[derive(Debug)]
pub struct FreeList<const PAGE_SIZE: usize> {
    /// The head of the free list.
    head: Option<NonNull<Run>>,
    /// The number of pages in the list.
    len: usize,
}

unsafe impl<const PAGE_SIZE: usize> Send for FreeList<PAGE_SIZE> {}

impl<const PAGE_SIZE: usize> Default for FreeList<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const PAGE_SIZE: usize> FreeList<PAGE_SIZE> {
    /// Creates an empty free list.
    #[must_use]
    pub const fn new() -> Self {
        const {
            assert!(size_of::<Run>() <= PAGE_SIZE);
        }

        Self { head: None, len: 0 }
    }

    /// Returns the number of pages in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Pushes a page onto the head of the list.
    ///
    /// # Safety
    ///
    /// `page` must be a page-aligned, writable page of `PAGE_SIZE` bytes that
    /// nobody else accesses while it is on the list.
    pub unsafe fn push(&mut self, page: NonNull<u8>) {
        unsafe {
            let mut run = page.cast::<Run>();
            run.as_mut().next = self.head;
            self.head = Some(run);
        }
        self.len += 1;
    }

    /// Pops the page at the head of the list.
    pub fn pop(&mut self) -> Option<NonNull<u8>> {
        let run = self.head.take()?;
        self.head = unsafe { run.as_ref().next };
        self.len -= 1;
        Some(run.cast())
    }
}
