//! # Fence Lock
//!
//! The spinlock that serializes a fence's flag transitions and callback list.
//!
//! The lock is supplied by whoever creates the fence and is usually shared by
//! every fence of one timeline, so a driver can signal a batch of fences in a
//! single critical section. The fence keeps a reference to it but does not own
//! the data it guards; that data lives in the fence behind a [`LockedBy`]
//! cell that can only be opened with a guard of the right lock.

use core::cell::UnsafeCell;
use core::fmt;
use core::ptr;

use spin::{Mutex, MutexGuard};

// =============================================================================
// FENCE LOCK
// =============================================================================

/// Spinlock protecting one or more fences
///
/// Never sleeps, so it may be taken from interrupt-like contexts.
pub struct FenceLock {
    name: &'static str,
    raw: Mutex<()>,
}

impl FenceLock {
    /// Create a new unlocked lock
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            raw: Mutex::new(()),
        }
    }

    /// Lock name (for diagnostics)
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spin until the lock is acquired
    pub fn lock(&self) -> FenceGuard<'_> {
        FenceGuard {
            lock: self,
            _raw: self.raw.lock(),
        }
    }

    /// Acquire the lock if it is free
    pub fn try_lock(&self) -> Option<FenceGuard<'_>> {
        self.raw.try_lock().map(|raw| FenceGuard { lock: self, _raw: raw })
    }

    /// Is the lock currently held by anyone?
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

impl fmt::Debug for FenceLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FenceLock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Proof that a [`FenceLock`] is held
pub struct FenceGuard<'a> {
    lock: &'a FenceLock,
    _raw: MutexGuard<'a, ()>,
}

impl<'a> FenceGuard<'a> {
    /// The lock this guard holds
    pub fn lock(&self) -> &'a FenceLock {
        self.lock
    }

    /// Does this guard hold `lock`?
    pub fn holds(&self, lock: &FenceLock) -> bool {
        ptr::eq(self.lock, lock)
    }
}

impl fmt::Debug for FenceGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FenceGuard").field(&self.lock.name).finish()
    }
}

// =============================================================================
// LOCKED-BY CELL
// =============================================================================

/// Data protected by an external [`FenceLock`]
///
/// The owner lock must outlive the cell; fences guarantee this by holding an
/// `Arc` to it.
pub(crate) struct LockedBy<T> {
    owner: *const FenceLock,
    data: UnsafeCell<T>,
}

// SAFETY: the data is only reachable through `access`, which requires the
// owner lock to be held; the lock provides the required exclusion.
unsafe impl<T: Send> Send for LockedBy<T> {}
// SAFETY: see above, shared references never expose `T` without the lock.
unsafe impl<T: Send> Sync for LockedBy<T> {}

impl<T> LockedBy<T> {
    pub(crate) fn new(owner: &FenceLock, data: T) -> Self {
        Self {
            owner,
            data: UnsafeCell::new(data),
        }
    }

    /// Open the cell with a guard of the owning lock
    ///
    /// # Panics
    /// If `guard` belongs to a different lock.
    pub(crate) fn access<'g>(&'g self, guard: &'g mut FenceGuard<'_>) -> &'g mut T {
        assert!(
            ptr::eq(guard.lock, self.owner),
            "fence state accessed under foreign lock '{}'",
            guard.lock.name
        );
        // SAFETY: the owner lock is held (checked above) and the returned
        // borrow is tied to an exclusive borrow of the guard, so no other
        // reference into the cell can be created while it is alive.
        unsafe { &mut *self.data.get() }
    }

    /// Consume-time access, no lock needed
    pub(crate) fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}
