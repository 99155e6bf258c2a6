//! Lock primitives for running the memory core on a hosted target.
//!
//! The kernel provides two lock classes: spin locks for short critical
//! sections and sleep locks that suspend the caller. This crate implements
//! both on top of `std` threads so that the page allocator and the buffer
//! cache can be exercised by ordinary multi-threaded programs and tests.
//!
//! Holders are identified per thread, so [`HoldingMutex::holding`] answers
//! "does the calling thread hold this lock" the way the kernel answers it
//! per CPU (spin locks) or per process (sleep locks).

mod sleep_lock;
mod spin_lock;

use core::sync::atomic::{AtomicU64, Ordering};

pub use self::{
    sleep_lock::{RawSleepLock, SleepLock, SleepLockGuard},
    spin_lock::{RawSpinLock, SpinLock, SpinLockGuard},
};

/// Holder id meaning "nobody".
const NO_HOLDER: u64 = 0;

/// Returns a process-unique, non-zero id for the calling thread.
fn current_holder() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(NO_HOLDER + 1);

    std::thread_local! {
        static HOLDER_ID: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    }

    HOLDER_ID.with(|id| *id)
}
