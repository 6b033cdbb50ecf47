//! Busy-wait mutual exclusion.
//!
//! Guards the bookkeeping of every other primitive. It is the only lock in
//! this crate that never calls the supervisor, so a holder must not block:
//! release the guard before any gate call and re-take it afterwards.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A test-and-test-and-set spinlock protecting a `T`.
///
/// The data is only reachable through [`SpinlockGuard`], which releases the
/// lock when dropped or when [`SpinlockGuard::unlock`] is called.
pub struct Spinlock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `locked`.
unsafe impl<T: ?Sized + Send> Send for Spinlock<T> {}
unsafe impl<T: ?Sized + Send> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Spinlock<T> {
    /// Spins until the lock is taken.
    #[inline]
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinlockGuard { lock: self };
            }
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    /// Takes the lock only if it is free right now.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinlockGuard { lock: self })
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Exclusive access without locking; `&mut self` proves no guard exists.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl Spinlock<()> {
    /// Takes the lock without handing out a guard.
    ///
    /// For callers that pair lock and unlock across separate calls, such as
    /// the C entry points. Release with [`Self::unlock_detached`].
    pub fn lock_detached(&self) {
        core::mem::forget(self.lock());
    }

    /// Takes the lock without a guard if it is free right now.
    pub fn try_lock_detached(&self) -> bool {
        self.try_lock().map(core::mem::forget).is_some()
    }

    /// Releases a lock taken with [`Self::lock_detached`]. There is no data
    /// behind a `Spinlock<()>`, so an unmatched release cannot alias anything.
    pub fn unlock_detached(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

impl<T: Default> Default for Spinlock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + core::fmt::Debug> core::fmt::Debug for Spinlock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("Spinlock").field("data", &&*guard).finish(),
            None => f.write_str("Spinlock { <locked> }"),
        }
    }
}

/// Scoped access to a [`Spinlock`]'s data.
pub struct SpinlockGuard<'a, T: ?Sized> {
    lock: &'a Spinlock<T>,
}

impl<T: ?Sized> SpinlockGuard<'_, T> {
    /// Releases the lock. Equivalent to dropping the guard, but reads as a
    /// deliberate step before a supervisor call.
    #[inline]
    pub fn unlock(self) {
        drop(self);
    }
}

impl<T: ?Sized> Deref for SpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock exclusively.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinlockGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
