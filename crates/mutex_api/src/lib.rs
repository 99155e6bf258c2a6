//! A simple mutex API.
//!
//! Both the page allocator and the buffer cache are generic over the locks
//! they use, so that the same code runs on top of kernel spin/sleep locks or
//! on top of the hosted locks in `host_sync`.
#![cfg_attr(any(not(feature = "std"), target_os = "none"), no_std)]

use core::ops::DerefMut;

/// A mutex.
pub trait Mutex {
    /// The type of the data that the mutex protects.
    type Data;

    /// The type of the guard that the `lock` method returns.
    type Guard<'a>: DerefMut<Target = Self::Data>
    where
        Self: 'a;

    /// Creates a new mutex.
    fn new(data: Self::Data) -> Self;

    /// Locks the mutex.
    fn lock(&self) -> Self::Guard<'_>;
}

/// A mutex that remembers which execution context holds it.
///
/// Long-hold locks implement this so that operations which require the
/// caller to own the lock (flushing or releasing a buffer) can check it.
pub trait HoldingMutex: Mutex {
    /// Returns `true` if the current execution context holds the lock.
    fn holding(&self) -> bool;
}

#[cfg(all(feature = "std", not(target_os = "none")))]
impl<T> Mutex for std::sync::Mutex<T> {
    type Data = T;
    type Guard<'a>
        = std::sync::MutexGuard<'a, T>
    where
        T: 'a;

    fn new(data: Self::Data) -> Self {
        Self::new(data)
    }

    fn lock(&self) -> Self::Guard<'_> {
        // a holder that panicked has already been reported
        self.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn bump<M>(m: &M)
    where
        M: Mutex<Data = u32>,
    {
        *m.lock() += 1;
    }

    #[test]
    fn std_mutex_through_trait() {
        let m = <std::sync::Mutex<u32> as Mutex>::new(1);
        bump(&m);
        bump(&m);
        assert_eq!(*Mutex::lock(&m), 3);
    }
}
