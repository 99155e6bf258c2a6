use core::{fmt, ptr::NonNull};

/// A handle to one physical page.
///
/// Copying a `PageFrame` does not take a reference, and dropping one does not
/// release a reference. The count of the page only changes through
/// [`PageFrameAllocator`](crate::PageFrameAllocator) operations, so every
/// holder must pair its `alloc`/`increment_ref` with a `free`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageFrame<const PAGE_SIZE: usize>(NonNull<u8>);

unsafe impl<const PAGE_SIZE: usize> Send for PageFrame<PAGE_SIZE> {}
unsafe impl<const PAGE_SIZE: usize> Sync for PageFrame<PAGE_SIZE> {}

impl<const PAGE_SIZE: usize> fmt::Debug for PageFrame<PAGE_SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PageFrame")
            .field(&format_args!("{:#x}", self.addr()))
            .finish()
    }
}

impl<const PAGE_SIZE: usize> PageFrame<PAGE_SIZE> {
    /// Wraps a raw page address.
    ///
    /// The address is not checked here; the allocator validates it when the
    /// handle is passed back.
    #[must_use]
    pub const fn from_raw(ptr: NonNull<u8>) -> Self {
        Self(ptr)
    }

    /// Returns the pointer to the first byte of the page.
    #[must_use]
    pub const fn as_non_null(self) -> NonNull<u8> {
        self.0
    }

    /// Returns the physical address of the page.
    #[must_use]
    pub fn addr(self) -> usize {
        self.0.addr().get()
    }

    /// Returns the content of the page.
    ///
    /// # Safety
    ///
    /// The caller must hold a reference to the page, and nobody may write the
    /// page while the returned slice is alive.
    #[must_use]
    pub unsafe fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        unsafe { self.0.cast::<[u8; PAGE_SIZE]>().as_ref() }
    }

    /// Returns the content of the page for writing.
    ///
    /// # Safety
    ///
    /// The caller must own the page exclusively (reference count 1) and
    /// nobody else may access the page while the returned slice is alive.
    #[must_use]
    pub unsafe fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        unsafe { self.0.cast::<[u8; PAGE_SIZE]>().as_mut() }
    }
}

impl<const PAGE_SIZE: usize> From<PageFrame<PAGE_SIZE>> for NonNull<u8> {
    fn from(page: PageFrame<PAGE_SIZE>) -> Self {
        page.0
    }
}
