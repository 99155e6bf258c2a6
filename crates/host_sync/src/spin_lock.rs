use core::{
    cell::UnsafeCell,
    hint,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use mutex_api::{HoldingMutex, Mutex};

use crate::NO_HOLDER;

/// A lock that busy-waits until it becomes free.
///
/// Only for short critical sections that never block.
#[derive(Debug)]
pub struct RawSpinLock {
    locked: AtomicBool,
    holder: AtomicU64,
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSpinLock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            holder: AtomicU64::new(NO_HOLDER),
        }
    }

    /// Acquires the lock.
    ///
    /// Loops (spins) until the lock is acquired.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds the lock.
    pub fn acquire(&self) {
        assert!(!self.holding(), "spin lock acquired twice by one thread");

        // `Ordering::Acquire` keeps the critical section's loads and stores
        // after the point where the lock is taken.
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }

        self.holder.store(crate::current_holder(), Ordering::Relaxed);
    }

    /// Tries to acquire the lock without spinning.
    ///
    /// Returns `true` if the lock was acquired.
    pub fn try_acquire(&self) -> bool {
        assert!(!self.holding(), "spin lock acquired twice by one thread");

        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        self.holder.store(crate::current_holder(), Ordering::Relaxed);
        true
    }

    /// Releases the lock.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the lock.
    pub fn release(&self) {
        assert!(self.holding(), "spin lock released by non-holder");

        self.holder.store(NO_HOLDER, Ordering::Relaxed);

        // `Ordering::Release` makes every store of the critical section
        // visible before the lock is observed free.
        self.locked.store(false, Ordering::Release);
    }

    /// Checks whether the calling thread is holding the lock.
    #[must_use]
    pub fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
            && self.holder.load(Ordering::Relaxed) == crate::current_holder()
    }
}

#[derive(Debug, Default)]
pub struct SpinLock<T> {
    lock: RawSpinLock,
    value: UnsafeCell<T>,
}

unsafe impl<T> Sync for SpinLock<T> where T: Send {}
unsafe impl<T> Send for SpinLock<T> where T: Send {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            lock: RawSpinLock::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock.
    ///
    /// Loops (spins) until the lock is acquired.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.lock.acquire();
        SpinLockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.lock.try_acquire().then(|| SpinLockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T> Mutex for SpinLock<T> {
    type Data = T;
    type Guard<'a>
        = SpinLockGuard<'a, T>
    where
        T: 'a;

    fn new(data: Self::Data) -> Self {
        Self::new(data)
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.lock()
    }
}

impl<T> HoldingMutex for SpinLock<T> {
    fn holding(&self) -> bool {
        self.lock.holding()
    }
}

/// Guard of a [`SpinLock`].
///
/// Spin locks are released on the thread that took them, so the guard is
/// not `Send`.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T> Sync for SpinLockGuard<'_, T> where T: Sync {}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.lock.release();
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.value.get() }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn counts_under_contention() {
        let counter = Arc::new(SpinLock::new(0_usize));
        let handles = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *counter.lock() += 1;
                    }
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock(), 8000);
    }

    #[test]
    fn holding_follows_guard() {
        let lock = SpinLock::new(());
        assert!(!HoldingMutex::holding(&lock));
        let guard = lock.lock();
        assert!(HoldingMutex::holding(&lock));
        drop(guard);
        assert!(!HoldingMutex::holding(&lock));
    }

    #[test]
    fn try_lock_fails_while_held_elsewhere() {
        let lock = Arc::new(SpinLock::new(()));
        let guard = lock.lock();
        let other = Arc::clone(&lock);
        let acquired = thread::spawn(move || other.try_lock().is_some())
            .join()
            .unwrap();
        assert!(!acquired);
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    #[should_panic(expected = "spin lock acquired twice by one thread")]
    fn reentry_is_fatal() {
        let lock = SpinLock::new(());
        let _first = lock.lock();
        let _second = lock.lock();
    }
}
