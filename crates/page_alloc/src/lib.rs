//! Physical page allocator with per-page reference counts.
//!
//! Pages are handed out from a free list and carry a reference count so that
//! they can be shared (for example by copy-on-write mappings). A page goes
//! back to the free list when its last reference is dropped.

#![cfg_attr(not(test), no_std)]

mod free_list;
mod page;
pub mod page_frame_allocator;
pub mod ref_table;

pub use self::{
    free_list::FreeList,
    page::PageFrame,
    page_frame_allocator::PageFrameAllocator,
    ref_table::{PageRefTable, RefCounts},
};

/// Errors the page allocator reports to its callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PageAllocError {
    #[error("no free page")]
    NoFreePage,
}

/// Usage of the physical page pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub free_pages: usize,
    pub total_pages: usize,
    pub page_size: usize,
}
