use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};
use std::sync::{Condvar, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};

use mutex_api::{HoldingMutex, Mutex};

use crate::NO_HOLDER;

/// Long-term lock that suspends the waiting thread.
#[derive(Debug, Default)]
pub struct RawSleepLock {
    /// Holder of the lock, or [`NO_HOLDER`].
    holder: StdMutex<u64>,
    /// Threads waiting for the lock sleep here.
    released: Condvar,
}

impl RawSleepLock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            holder: StdMutex::new(NO_HOLDER),
            released: Condvar::new(),
        }
    }

    fn state(&self) -> StdMutexGuard<'_, u64> {
        self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires the lock, sleeping until it is free.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds the lock.
    pub fn acquire(&self) {
        let me = crate::current_holder();
        let mut holder = self.state();
        assert_ne!(*holder, me, "sleep lock acquired twice by one thread");
        while *holder != NO_HOLDER {
            holder = self
                .released
                .wait(holder)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *holder = me;
    }

    /// Acquires the lock if it is free.
    ///
    /// Returns `true` if the lock was acquired.
    pub fn try_acquire(&self) -> bool {
        let mut holder = self.state();
        if *holder != NO_HOLDER {
            return false;
        }
        *holder = crate::current_holder();
        true
    }

    /// Releases the lock and wakes up the threads sleeping on it.
    ///
    /// The lock may be released by a thread other than the one that took
    /// it; ownership checks belong to the callers that need them.
    pub fn release(&self) {
        let mut holder = self.state();
        assert_ne!(*holder, NO_HOLDER, "sleep lock released while unlocked");
        *holder = NO_HOLDER;
        drop(holder);
        self.released.notify_all();
    }

    /// Checks whether the calling thread holds the lock.
    #[must_use]
    pub fn holding(&self) -> bool {
        *self.state() == crate::current_holder()
    }
}

#[derive(Debug, Default)]
pub struct SleepLock<T> {
    lock: RawSleepLock,
    value: UnsafeCell<T>,
}

unsafe impl<T> Sync for SleepLock<T> where T: Send {}
unsafe impl<T> Send for SleepLock<T> where T: Send {}

impl<T> SleepLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            lock: RawSleepLock::new(),
            value: UnsafeCell::new(value),
        }
    }

    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T>> {
        self.lock
            .try_acquire()
            .then(|| SleepLockGuard { lock: self })
    }

    /// Acquires the lock.
    ///
    /// Sleeps until the lock is acquired.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        self.lock.acquire();
        SleepLockGuard { lock: self }
    }

    /// Checks whether the calling thread holds the lock.
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }
}

impl<T> Mutex for SleepLock<T> {
    type Data = T;
    type Guard<'a>
        = SleepLockGuard<'a, T>
    where
        T: 'a;

    fn new(data: Self::Data) -> Self {
        Self::new(data)
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.lock()
    }
}

impl<T> HoldingMutex for SleepLock<T> {
    fn holding(&self) -> bool {
        self.lock.holding()
    }
}

/// Guard of a [`SleepLock`].
///
/// The guard may be moved to another thread. That thread can use the data
/// but does not become the holder, so [`HoldingMutex::holding`] keeps
/// reporting the thread that acquired the lock.
pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
}

unsafe impl<T> Send for SleepLockGuard<'_, T> where T: Send {}
unsafe impl<T> Sync for SleepLockGuard<'_, T> where T: Sync {}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.lock.release();
    }
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.value.get() }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn waiter_sleeps_until_release() {
        let lock = Arc::new(SleepLock::new(Vec::new()));
        let entered = Arc::new(AtomicBool::new(false));

        let mut guard = lock.lock();
        let waiter = {
            let lock = Arc::clone(&lock);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                let mut guard = lock.lock();
                entered.store(true, Ordering::SeqCst);
                guard.push(2);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));
        guard.push(1);
        drop(guard);

        waiter.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
        assert_eq!(*lock.lock(), [1, 2]);
    }

    #[test]
    fn moved_guard_is_not_held_by_receiver() {
        let lock = SleepLock::new(0_u32);
        let guard = lock.lock();
        assert!(lock.holding());

        let lock_ref = &lock;
        let held_there = thread::scope(|s| {
            s.spawn(move || {
                let held = lock_ref.holding();
                drop(guard);
                held
            })
            .join()
            .unwrap()
        });

        assert!(!held_there);
        assert!(!lock.holding());
        assert!(lock.try_lock().is_some());
    }

    #[test]
    #[should_panic(expected = "sleep lock acquired twice by one thread")]
    fn reentry_is_fatal() {
        let lock = SleepLock::new(());
        let _first = lock.lock();
        let _second = lock.lock();
    }
}
