use std::{collections::HashSet, sync::Mutex, thread};

use kcore::{Config, Error, MemoryCore};
use page_alloc::{
    PageAllocError,
    page_frame_allocator::{ALLOC_JUNK, FREE_JUNK},
};

use self::common::Arena;

mod common;

const ARENA_PAGES: usize = 16;

fn new_core(arena: &mut Arena) -> MemoryCore {
    let config = Config {
        disk_blocks: 8,
        ..Config::default()
    };
    unsafe { MemoryCore::with_ram_disk(&config, arena.range()) }.unwrap()
}

#[test]
fn pool_excludes_reference_table() {
    let mut arena = Arena::new(ARENA_PAGES);
    let core = new_core(&mut arena);

    let info = core.memory_info();
    assert_eq!(info.total_pages, ARENA_PAGES - 1);
    assert_eq!(info.free_pages, info.total_pages);
    assert_eq!(info.page_size, 4096);
}

#[test]
fn shared_page_returns_with_last_reference() {
    let mut arena = Arena::new(ARENA_PAGES);
    let core = new_core(&mut arena);
    let free = core.memory_info().free_pages;

    let page = core.alloc_page().unwrap();
    assert_eq!(core.memory_info().free_pages, free - 1);
    assert!(unsafe { page.as_bytes() }.iter().all(|&b| b == ALLOC_JUNK));

    // a second holder maps the page
    assert_eq!(core.pages().increment_ref(page), 2);

    unsafe { core.free_page(page) };
    assert_eq!(core.pages().ref_count(page), 1);
    assert_eq!(core.memory_info().free_pages, free - 1);

    unsafe { core.free_page(page) };
    assert_eq!(core.pages().ref_count(page), 0);
    assert_eq!(core.memory_info().free_pages, free);
    assert!(unsafe { page.as_bytes() }.iter().all(|&b| b == FREE_JUNK));

    // the free list hands out the most recently freed page
    let again = core.alloc_page().unwrap();
    assert_eq!(again, page);
    assert_eq!(core.pages().ref_count(again), 1);
    assert!(unsafe { again.as_bytes() }.iter().all(|&b| b == ALLOC_JUNK));
}

#[test]
fn decrement_then_increment_restores_count() {
    let mut arena = Arena::new(ARENA_PAGES);
    let core = new_core(&mut arena);

    let page = core.alloc_page().unwrap();
    assert_eq!(core.pages().decrement_ref(page), 0);
    assert_eq!(core.pages().increment_ref(page), 1);

    unsafe { core.free_page(page) };
    assert_eq!(core.pages().ref_count(page), 0);
}

#[test]
fn reallocated_page_carries_no_old_content() {
    let mut arena = Arena::new(ARENA_PAGES);
    let core = new_core(&mut arena);

    let mut page = core.alloc_zeroed_page().unwrap();
    unsafe { page.as_bytes_mut() }.fill(0x42);
    unsafe { core.free_page(page) };

    let page = core.alloc_page().unwrap();
    assert!(unsafe { page.as_bytes() }.iter().all(|&b| b == ALLOC_JUNK));

    let zeroed = core.alloc_zeroed_page().unwrap();
    assert!(unsafe { zeroed.as_bytes() }.iter().all(|&b| b == 0));
}

#[test]
fn exhausted_pool_is_not_fatal() {
    let mut arena = Arena::new(ARENA_PAGES);
    let core = new_core(&mut arena);

    let pages = (0..core.memory_info().total_pages)
        .map(|_| core.alloc_page().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(
        core.alloc_page(),
        Err(Error::Page(PageAllocError::NoFreePage))
    );

    unsafe { core.free_page(pages[3]) };
    assert_eq!(core.alloc_page(), Ok(pages[3]));
}

#[test]
#[should_panic(expected = "free: attempt to free already unreferenced page")]
fn double_free() {
    let mut arena = Arena::new(ARENA_PAGES);
    let core = new_core(&mut arena);

    let page = core.alloc_page().unwrap();
    unsafe {
        core.free_page(page);
        core.free_page(page);
    }
}

#[test]
fn concurrent_holders_never_share_a_page() {
    let mut arena = Arena::new(ARENA_PAGES);
    let core = new_core(&mut arena);
    let live = Mutex::new(HashSet::new());

    thread::scope(|s| {
        for id in 1..=6_u8 {
            let core = &core;
            let live = &live;
            s.spawn(move || {
                for _ in 0..200 {
                    let Ok(mut page) = core.alloc_page() else {
                        thread::yield_now();
                        continue;
                    };
                    assert!(live.lock().unwrap().insert(page.addr()));

                    unsafe { page.as_bytes_mut() }.fill(id);
                    thread::yield_now();
                    assert!(unsafe { page.as_bytes() }.iter().all(|&b| b == id));

                    assert!(live.lock().unwrap().remove(&page.addr()));
                    unsafe { core.free_page(page) };
                }
            });
        }
    });

    let info = core.memory_info();
    assert_eq!(info.free_pages, info.total_pages);
}
