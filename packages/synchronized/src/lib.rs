//! Scoped acquisition wrapper granting bracketed access to wrapped data.
//!
//! [`Synchronized<T, P>`] pairs a value with a lock policy and only hands
//! the value out under the lock, releasing on every exit path (including
//! unwinding):
//!
//! - [`lock()`](Synchronized::lock) opens an explicit transaction: the
//!   returned guard derefs to the data and holds the lock until it drops;
//! - [`with()`](Synchronized::with) brackets a single closure call, the
//!   one-shot equivalent.
//!
//! The lock policy is injectable:
//!
//! - [`OwnedLock`]: the wrapper owns its own mutex (the default);
//! - [`ExternalLock`]: several wrappers share one caller-owned lock;
//! - [`DataLock`]: the data brings its own `lock`/`unlock` methods via
//!   the [`SelfLocking`] trait.
//!
//! # Example
//!
//! ```rust
//! use synchronized::Synchronized;
//!
//! let counter = Synchronized::new(0_u32);
//!
//! counter.with(|value| *value += 1);
//!
//! let mut transaction = counter.lock();
//! *transaction += 1;
//! drop(transaction);
//!
//! assert_eq!(counter.with(|value| *value), 2);
//! ```

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use parking_lot::lock_api::RawMutex as _;

/// Acquire/release bracketing used by [`Synchronized`].
///
/// `acquire` must block until the calling thread holds the lock; `release`
/// gives it back. Both receive the wrapped data so a policy may delegate
/// to lock methods on the data itself.
pub trait LockPolicy<T: ?Sized> {
    /// Blocks until the lock is held.
    fn acquire(&self, data: &T);

    /// Releases the lock.
    ///
    /// Called exactly once per `acquire`, by the guard that performed it.
    fn release(&self, data: &T);
}

/// A lock owned by the wrapper itself. The default policy.
///
/// Not re-entrant: locking twice from one thread deadlocks.
pub struct OwnedLock {
    raw: parking_lot::RawMutex,
}

impl OwnedLock {
    /// Creates an unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            raw: parking_lot::RawMutex::INIT,
        }
    }
}

impl Default for OwnedLock {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> LockPolicy<T> for OwnedLock {
    fn acquire(&self, _data: &T) {
        self.raw.lock();
    }

    fn release(&self, _data: &T) {
        // SAFETY: The guard calling this is the one whose acquire() locked
        // the mutex, and it calls release exactly once.
        unsafe {
            self.raw.unlock();
        }
    }
}

impl fmt::Debug for OwnedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedLock").finish_non_exhaustive()
    }
}

/// A lock owned by the caller and shared between wrappers.
///
/// All wrappers built over the same [`OwnedLock`] exclude each other, which
/// is the point: one coarse lock over several pieces of data.
#[derive(Debug)]
pub struct ExternalLock<'l> {
    lock: &'l OwnedLock,
}

impl<'l> ExternalLock<'l> {
    /// Creates a policy deferring to the given shared lock.
    #[must_use]
    pub fn new(lock: &'l OwnedLock) -> Self {
        Self { lock }
    }
}

impl<T: ?Sized> LockPolicy<T> for ExternalLock<'_> {
    fn acquire(&self, data: &T) {
        LockPolicy::<T>::acquire(self.lock, data);
    }

    fn release(&self, data: &T) {
        LockPolicy::<T>::release(self.lock, data);
    }
}

/// Lock methods provided by the data itself, for use with [`DataLock`].
pub trait SelfLocking {
    /// Blocks until the calling thread holds the data's lock.
    fn lock(&self);

    /// Releases the data's lock.
    fn unlock(&self);
}

/// A policy that delegates to the data's own [`SelfLocking`] methods.
#[derive(Clone, Copy, Debug, Default)]
pub struct DataLock;

impl<T: ?Sized + SelfLocking> LockPolicy<T> for DataLock {
    fn acquire(&self, data: &T) {
        data.lock();
    }

    fn release(&self, data: &T) {
        data.unlock();
    }
}

/// A value only reachable under its lock policy.
pub struct Synchronized<T, P = OwnedLock> {
    policy: P,
    data: UnsafeCell<T>,
}

// SAFETY: Moving the wrapper moves the data; both must be transferable.
unsafe impl<T: Send, P: Send> Send for Synchronized<T, P> {}
// SAFETY: Shared access only reaches the data through the lock policy,
// which serializes it; like a mutex, T only needs to be Send.
unsafe impl<T: Send, P: Sync> Sync for Synchronized<T, P> {}

impl<T> Synchronized<T> {
    /// Wraps `data` behind a lock of its own.
    #[must_use]
    pub fn new(data: T) -> Self {
        Self::with_policy(data, OwnedLock::new())
    }
}

impl<T, P: LockPolicy<T>> Synchronized<T, P> {
    /// Wraps `data` behind the given lock policy.
    #[must_use]
    pub fn with_policy(data: T, policy: P) -> Self {
        Self {
            policy,
            data: UnsafeCell::new(data),
        }
    }

    /// Opens a transaction: acquires the lock and returns a guard that
    /// holds it until dropped.
    pub fn lock(&self) -> SynchronizedGuard<'_, T, P> {
        // SAFETY: Only passed to the policy, which treats it as opaque
        // (or, for DataLock, calls the data's own lock methods, which are
        // callable unlocked by contract).
        self.policy.acquire(unsafe { &*self.data.get() });

        SynchronizedGuard {
            owner: self,
            _not_send: PhantomData,
        }
    }

    /// Runs `operation` with exclusive access to the data, acquiring and
    /// releasing around the single call.
    pub fn with<R>(&self, operation: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        operation(&mut guard)
    }
}

impl<T: fmt::Debug, P: LockPolicy<T>> fmt::Debug for Synchronized<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronized").finish_non_exhaustive()
    }
}

/// Exclusive access to the data of a [`Synchronized`]; releases the lock
/// when dropped, on normal and unwinding exits alike.
pub struct SynchronizedGuard<'s, T, P: LockPolicy<T>> {
    owner: &'s Synchronized<T, P>,
    /// The lock must be released on the thread that acquired it.
    _not_send: PhantomData<*const ()>,
}

impl<T, P: LockPolicy<T>> Deref for SynchronizedGuard<'_, T, P> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The guard holds the lock, so access is exclusive.
        unsafe { &*self.owner.data.get() }
    }
}

impl<T, P: LockPolicy<T>> DerefMut for SynchronizedGuard<'_, T, P> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: The guard holds the lock, so access is exclusive.
        unsafe { &mut *self.owner.data.get() }
    }
}

impl<T, P: LockPolicy<T>> Drop for SynchronizedGuard<'_, T, P> {
    fn drop(&mut self) {
        // SAFETY: The guard holds the lock; this is its single release.
        self.owner.policy.release(unsafe { &*self.owner.data.get() });
    }
}

impl<T, P: LockPolicy<T>> fmt::Debug for SynchronizedGuard<'_, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronizedGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Arc;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Synchronized<u32>: Send, Sync);

    #[test]
    fn with_brackets_a_single_call() {
        let value = Synchronized::new(10_u32);

        let doubled = value.with(|value| {
            *value *= 2;
            *value
        });

        assert_eq!(doubled, 20);
    }

    #[test]
    fn transaction_holds_until_guard_drops() {
        let value = Synchronized::new(vec![1, 2]);

        {
            let mut transaction = value.lock();
            transaction.push(3);
            transaction.push(4);
            assert_eq!(transaction.len(), 4);
        }

        assert_eq!(value.with(|list| list.len()), 4);
    }

    #[test]
    fn lock_releases_on_panic() {
        let value = Synchronized::new(0_u32);

        let result = catch_unwind(AssertUnwindSafe(|| {
            value.with(|_| panic!("inside the bracket"));
        }));
        assert!(result.is_err());

        // Would deadlock if the unwinding exit had leaked the lock.
        value.with(|value| *value += 1);
        assert_eq!(value.with(|value| *value), 1);
    }

    #[test]
    fn mutual_exclusion_across_threads() {
        let value = Arc::new(Synchronized::new(0_u32));
        let mut handles = Vec::new();

        for _ in 0..10 {
            let value = Arc::clone(&value);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    value.with(|value| *value += 1);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(value.with(|value| *value), 1000);
    }

    #[test]
    fn external_lock_is_shared_between_wrappers() {
        let lock = OwnedLock::new();

        let first = Synchronized::with_policy(1_u32, ExternalLock::new(&lock));
        let second = Synchronized::with_policy(2_u32, ExternalLock::new(&lock));

        // Sequential transactions through the shared lock work; holding
        // one excludes the other (they are the same mutex).
        first.with(|value| *value += 10);
        second.with(|value| *value += 10);

        assert_eq!(first.with(|value| *value), 11);
        assert_eq!(second.with(|value| *value), 12);
    }

    #[test]
    fn data_lock_delegates_to_the_data_itself() {
        #[derive(Default)]
        struct CountsItsLocks {
            locks: Cell<u32>,
            unlocks: Cell<u32>,
            payload: Cell<u32>,
        }

        impl SelfLocking for CountsItsLocks {
            fn lock(&self) {
                self.locks.set(self.locks.get() + 1);
            }

            fn unlock(&self) {
                self.unlocks.set(self.unlocks.get() + 1);
            }
        }

        let value = Synchronized::with_policy(CountsItsLocks::default(), DataLock);

        value.with(|data| data.payload.set(5));
        {
            let transaction = value.lock();
            transaction.payload.set(6);
        }

        value.with(|data| {
            assert_eq!(data.payload.get(), 6);
            // Two completed brackets before this one.
            assert_eq!(data.locks.get(), 3);
            assert_eq!(data.unlocks.get(), 2);
        });
    }
}
