use std::{ops::Range, ptr::NonNull};

use kcore_params::PAGE_SIZE;

#[repr(C, align(4096))]
struct PageBuf([u8; PAGE_SIZE]);

/// Page-aligned memory standing in for physical RAM.
pub struct Arena {
    pages: Box<[PageBuf]>,
}

impl Arena {
    pub fn new(pages: usize) -> Self {
        Self {
            pages: (0..pages).map(|_| PageBuf([0; PAGE_SIZE])).collect(),
        }
    }

    /// The arena must outlive whatever manages the returned range.
    pub fn range(&mut self) -> Range<NonNull<u8>> {
        let start = NonNull::from(&mut self.pages[..]).cast::<u8>();
        let end = unsafe { start.byte_add(self.pages.len() * PAGE_SIZE) };
        start..end
    }
}
