//! # DMA Fence
//!
//! A fence is a one-shot completion event shared across drivers: a GPU job,
//! a display flip, a codec frame. It starts unsignaled, is signaled exactly
//! once by its owner, and never goes back.
//!
//! ## Lifecycle
//!
//! ```text
//!   Fence::new ──► UNSIGNALED ──signal()──► SIGNALED (terminal)
//!                     │                        ▲
//!                     └── last Arc dropped ────┘  (contract violation:
//!                         with callbacks          forced, error = EDEADLK)
//! ```
//!
//! Interested parties either block ([`Fence::wait_timeout`]) or register a
//! [`FenceCallback`]. Driver completion detection is armed lazily, the first
//! time anybody needs to be told, through [`FenceOps::enable_signaling`].

use alloc::collections::VecDeque;
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use crate::callback::{CallbackFn, CallbackNode, FenceCallback};
use crate::error::{Errno, FenceError, FenceResult};
use crate::flags::{AtomicFenceFlags, FenceFlags};
use crate::lock::{FenceGuard, FenceLock, LockedBy};
use crate::ops::FenceOps;
use crate::sched;
use crate::signalling::SignallingSection;
use crate::time::Timestamp;

/// Driver name reported once the driver may be gone
pub const DETACHED_DRIVER_NAME: &str = "detached-driver";
/// Timeline name reported once the driver may be gone
pub const SIGNALED_TIMELINE_NAME: &str = "signaled-timeline";

// =============================================================================
// STATUS
// =============================================================================

/// Completion status of a fence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// Not signaled yet
    Pending,
    /// Signaled, the work completed successfully
    Signaled,
    /// Signaled, the work failed with the given error
    Error(Errno),
}

impl FenceStatus {
    /// Kernel convention: 0 pending, 1 signaled, negative errno on error
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Pending => 0,
            Self::Signaled => 1,
            Self::Error(e) => e.as_raw(),
        }
    }

    /// Has the fence completed (successfully or not)?
    pub const fn is_signaled(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

// =============================================================================
// FENCE
// =============================================================================

/// Cross-driver completion fence
///
/// Always handled through `Arc<Fence>`. Waiters and callback registrants must
/// hold their own reference for as long as they wait.
pub struct Fence {
    ops: Arc<dyn FenceOps>,
    lock: Arc<FenceLock>,
    context: u64,
    seqno: u64,
    flags: AtomicFenceFlags,
    /// Raw errno, 0 for success. Meaningful once signaled.
    error: AtomicI32,
    /// Nanoseconds. Meaningful once `TIMESTAMP` is set.
    timestamp: AtomicU64,
    callbacks: LockedBy<VecDeque<Arc<CallbackNode>>>,
}

impl Fence {
    /// Create an unsignaled fence
    ///
    /// `lock` protects the fence state and is typically shared by all fences
    /// of one timeline. `context` comes from a
    /// [`ContextAllocator`](crate::ContextAllocator); `seqno` should increase
    /// within the context. Seqno comparisons wrap at 32 bits.
    pub fn new(ops: Arc<dyn FenceOps>, lock: Arc<FenceLock>, context: u64, seqno: u64) -> Arc<Self> {
        Self::with_flags(ops, lock, context, seqno, FenceFlags::empty())
    }

    /// Like [`Fence::new`], but seqno comparisons use all 64 bits
    pub fn new64(ops: Arc<dyn FenceOps>, lock: Arc<FenceLock>, context: u64, seqno: u64) -> Arc<Self> {
        Self::with_flags(ops, lock, context, seqno, FenceFlags::SEQNO64)
    }

    fn with_flags(
        ops: Arc<dyn FenceOps>,
        lock: Arc<FenceLock>,
        context: u64,
        seqno: u64,
        flags: FenceFlags,
    ) -> Arc<Self> {
        let callbacks = LockedBy::new(&lock, VecDeque::new());
        let fence = Arc::new(Self {
            ops,
            lock,
            context,
            seqno,
            flags: AtomicFenceFlags::new(flags),
            error: AtomicI32::new(0),
            timestamp: AtomicU64::new(0),
            callbacks,
        });
        log::trace!(
            "dma-fence: init {}:{} context {} seqno {}",
            fence.driver_name(),
            fence.timeline_name(),
            context,
            seqno
        );
        fence
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Timeline context id
    pub fn context(&self) -> u64 {
        self.context
    }

    /// Sequence number within the context
    pub fn seqno(&self) -> u64 {
        self.seqno
    }

    /// Snapshot of the state flags
    pub fn flags(&self) -> FenceFlags {
        self.flags.load()
    }

    /// The lock protecting this fence
    pub fn lock(&self) -> &FenceLock {
        &self.lock
    }

    /// The driver operations
    pub fn ops(&self) -> &dyn FenceOps {
        &*self.ops
    }

    /// Driver name, or [`DETACHED_DRIVER_NAME`] once signaled
    pub fn driver_name(&self) -> &str {
        if self.test_signaled_flag() {
            DETACHED_DRIVER_NAME
        } else {
            self.ops.driver_name(self)
        }
    }

    /// Timeline name, or [`SIGNALED_TIMELINE_NAME`] once signaled
    pub fn timeline_name(&self) -> &str {
        if self.test_signaled_flag() {
            SIGNALED_TIMELINE_NAME
        } else {
            self.ops.timeline_name(self)
        }
    }

    /// Completion error, if one was set
    pub fn error(&self) -> Option<Errno> {
        Errno::new(self.error.load(Ordering::Acquire))
    }

    /// Signal time, once recorded
    pub fn timestamp(&self) -> Option<Timestamp> {
        if self.flags.contains(FenceFlags::TIMESTAMP) {
            Some(Timestamp::from_nanos(self.timestamp.load(Ordering::Acquire)))
        } else {
            None
        }
    }

    fn assert_held(&self, guard: &FenceGuard<'_>) {
        assert!(
            guard.holds(&self.lock),
            "fence {}:{} operated under foreign lock '{}'",
            self.context,
            self.seqno,
            guard.lock().name()
        );
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Cheap flag test: has the fence been signaled?
    ///
    /// Does not ask the driver. Use [`Fence::is_signaled`] to also poll it.
    pub fn test_signaled_flag(&self) -> bool {
        self.flags.contains(FenceFlags::SIGNALED)
    }

    /// Has the fence completed?
    ///
    /// If the flag is not set yet, asks the driver's
    /// [`signaled`](FenceOps::signaled) hook and signals the fence when the
    /// hardware is already done. Takes the fence lock in that case.
    pub fn is_signaled(&self) -> bool {
        if self.test_signaled_flag() {
            return true;
        }
        if self.ops.signaled(self) {
            let _ = self.signal();
            return true;
        }
        false
    }

    /// [`Fence::is_signaled`] with the fence lock already held
    pub fn is_signaled_locked(&self, guard: &mut FenceGuard<'_>) -> bool {
        self.assert_held(guard);
        if self.test_signaled_flag() {
            return true;
        }
        if self.ops.signaled(self) {
            let _ = self.signal_locked(guard);
            return true;
        }
        false
    }

    /// Completion status
    pub fn status(&self) -> FenceStatus {
        let mut guard = self.lock.lock();
        self.status_locked(&mut guard)
    }

    /// [`Fence::status`] with the fence lock already held
    pub fn status_locked(&self, guard: &mut FenceGuard<'_>) -> FenceStatus {
        if !self.is_signaled_locked(guard) {
            return FenceStatus::Pending;
        }
        match self.error() {
            Some(e) => FenceStatus::Error(e),
            None => FenceStatus::Signaled,
        }
    }

    /// Attach a completion error before signalling
    ///
    /// Rejected with a warning once the fence is signaled. Takes the fence
    /// lock, so it cannot interleave with a concurrent signal.
    pub fn set_error(&self, error: Errno) -> FenceResult<()> {
        let mut guard = self.lock.lock();
        self.set_error_locked(&mut guard, error)
    }

    /// [`Fence::set_error`] with the fence lock already held
    ///
    /// For drivers completing a batch under the timeline lock: set the error,
    /// then [`Fence::signal_locked`] with the same guard.
    pub fn set_error_locked(&self, guard: &mut FenceGuard<'_>, error: Errno) -> FenceResult<()> {
        self.assert_held(guard);
        if self.test_signaled_flag() {
            log::warn!(
                "dma-fence: set_error({}) on signaled fence {}:{}",
                error,
                self.context,
                self.seqno
            );
            return Err(FenceError::AlreadySignaled);
        }
        self.error.store(error.as_raw(), Ordering::Release);
        Ok(())
    }

    // =========================================================================
    // Signalling
    // =========================================================================

    /// Signal with an explicit timestamp, fence lock held
    ///
    /// Moves the callback list out, records the timestamp and runs every
    /// pending callback once in list order. A second signal returns
    /// [`FenceError::AlreadySignaled`] and changes nothing.
    pub fn signal_timestamp_locked(
        &self,
        guard: &mut FenceGuard<'_>,
        timestamp: Timestamp,
    ) -> FenceResult<()> {
        let pending = {
            let list = self.callbacks.access(guard);
            if self.flags.test_and_set(FenceFlags::SIGNALED) {
                return Err(FenceError::AlreadySignaled);
            }
            mem::take(list)
        };

        self.timestamp.store(timestamp.as_nanos(), Ordering::Release);
        self.flags.insert(FenceFlags::TIMESTAMP);
        log::trace!(
            "dma-fence: signaled context {} seqno {} at {} ({} callbacks)",
            self.context,
            self.seqno,
            timestamp,
            pending.len()
        );

        for node in pending {
            node.fire(self);
        }
        Ok(())
    }

    /// Signal now, fence lock held
    pub fn signal_locked(&self, guard: &mut FenceGuard<'_>) -> FenceResult<()> {
        self.signal_timestamp_locked(guard, sched::now())
    }

    /// Signal with an explicit timestamp
    pub fn signal_timestamp(&self, timestamp: Timestamp) -> FenceResult<()> {
        let mut guard = self.lock.lock();
        self.signal_timestamp_locked(&mut guard, timestamp)
    }

    /// Signal the fence now
    ///
    /// The one way for a driver to complete a fence. Runs as a signalling
    /// critical section.
    pub fn signal(&self) -> FenceResult<()> {
        let _section = SignallingSection::enter();
        let mut guard = self.lock.lock();
        self.signal_timestamp_locked(&mut guard, sched::now())
    }

    fn enable_signaling_locked(&self, guard: &mut FenceGuard<'_>) -> bool {
        self.assert_held(guard);
        let was_set = self.flags.test_and_set(FenceFlags::ENABLE_SIGNAL);

        if self.test_signaled_flag() {
            return false;
        }

        if !was_set {
            log::trace!(
                "dma-fence: enable signal context {} seqno {}",
                self.context,
                self.seqno
            );
            if !self.ops.enable_signaling(self) {
                let _ = self.signal_locked(guard);
                return false;
            }
        }
        true
    }

    /// Arm driver completion detection now instead of lazily
    pub fn enable_sw_signaling(&self) {
        let mut guard = self.lock.lock();
        self.enable_signaling_locked(&mut guard);
    }

    pub(crate) fn mark_signaling_enabled(&self) {
        self.flags.insert(FenceFlags::ENABLE_SIGNAL);
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    /// Run `func` once when the fence signals
    ///
    /// Returns [`FenceError::NotFound`] without installing anything if the
    /// fence is already signaled (or got signaled because the driver could not
    /// arm signalling); the caller should then proceed as if `func` ran.
    ///
    /// `func` runs with the fence lock held, possibly on the signalling
    /// driver's interrupt path. It must not block and must not call locking
    /// methods of this fence.
    ///
    /// # Panics
    /// If `cb` is already pending on a fence.
    pub fn add_callback<F>(&self, cb: &FenceCallback, func: F) -> FenceResult<()>
    where
        F: FnOnce(&Fence) + Send + 'static,
    {
        assert!(!cb.is_pending(), "fence callback record registered twice");

        if self.test_signaled_flag() {
            return Err(FenceError::NotFound);
        }

        let func: CallbackFn = Box::new(func);
        let mut guard = self.lock.lock();
        if !self.enable_signaling_locked(&mut guard) {
            return Err(FenceError::NotFound);
        }
        cb.node().arm(func);
        self.callbacks
            .access(&mut guard)
            .push_back(Arc::clone(cb.node()));
        Ok(())
    }

    /// Queue a wake-up callback ahead of all others, fence lock held
    ///
    /// For the wait paths: the caller has already checked the fence is
    /// unsignaled and enabled signalling.
    pub(crate) fn add_wake_callback_locked(
        &self,
        guard: &mut FenceGuard<'_>,
        cb: &FenceCallback,
        func: CallbackFn,
    ) {
        cb.node().arm(func);
        self.callbacks
            .access(guard)
            .push_front(Arc::clone(cb.node()));
    }

    /// Cancel a pending callback
    ///
    /// Returns `true` if the callback was still pending and will now never
    /// run, `false` if it already ran (or is running) or was never registered
    /// here. Racing with a concurrent signal is inherently hazardous; keep
    /// this for error recovery paths.
    pub fn remove_callback(&self, cb: &FenceCallback) -> bool {
        let mut guard = self.lock.lock();
        let func = self.remove_callback_locked(&mut guard, cb);
        drop(guard);
        // The continuation's captures are dropped outside the lock
        func.is_some()
    }

    pub(crate) fn remove_callback_locked(
        &self,
        guard: &mut FenceGuard<'_>,
        cb: &FenceCallback,
    ) -> Option<CallbackFn> {
        if !cb.is_pending() {
            return None;
        }
        let list = self.callbacks.access(guard);
        let pos = list.iter().position(|node| Arc::ptr_eq(node, cb.node()))?;
        list.remove(pos);
        cb.node().disarm()
    }

    /// Pending nodes in dispatch order
    #[cfg(test)]
    pub(crate) fn callbacks_snapshot_locked(
        &self,
        guard: &mut FenceGuard<'_>,
    ) -> alloc::vec::Vec<Arc<CallbackNode>> {
        self.callbacks.access(guard).iter().cloned().collect()
    }

    // =========================================================================
    // Hints
    // =========================================================================

    /// Tell the driver the fence is wanted by `deadline`
    ///
    /// Ignored once signaled. Purely an optimization hint.
    pub fn set_deadline(&self, deadline: Timestamp) {
        if !self.is_signaled() {
            log::trace!(
                "dma-fence: deadline {} for context {} seqno {}",
                deadline,
                self.context,
                self.seqno
            );
            self.ops.set_deadline(self, deadline);
        }
    }

    // =========================================================================
    // Ordering
    // =========================================================================

    fn seqno_after(&self, a: u64, b: u64) -> bool {
        if self.flags.contains(FenceFlags::SEQNO64) {
            a > b
        } else {
            (a as u32).wrapping_sub(b as u32) as i32 > 0
        }
    }

    /// Has the hardware progressed to (or past) this fence's seqno?
    ///
    /// Helper for drivers implementing [`FenceOps::signaled`].
    pub fn seqno_passed(&self, hw_seqno: u64) -> bool {
        !self.seqno_after(self.seqno, hw_seqno)
    }

    /// Was this fence issued after `other` on the same timeline?
    ///
    /// Fences from different contexts are unordered: warns and returns false.
    pub fn is_later(&self, other: &Fence) -> bool {
        if self.context != other.context {
            log::warn!(
                "dma-fence: comparing fences from contexts {} and {}",
                self.context,
                other.context
            );
            return false;
        }
        self.seqno_after(self.seqno, other.seqno)
    }

    /// Is this the same fence as `other`, or a later one?
    pub fn is_later_or_same(&self, other: &Fence) -> bool {
        ptr::eq(self, other) || self.is_later(other)
    }

    /// The later of two fences on one timeline, unless it is already signaled
    ///
    /// `None` when the later fence is signaled (nothing left to wait for) or
    /// when the fences are on different timelines.
    pub fn later<'a>(a: &'a Arc<Fence>, b: &'a Arc<Fence>) -> Option<&'a Arc<Fence>> {
        if a.context != b.context {
            log::warn!(
                "dma-fence: later() across contexts {} and {}",
                a.context,
                b.context
            );
            return None;
        }
        let later = if a.is_later(b) { a } else { b };
        if later.is_signaled() {
            None
        } else {
            Some(later)
        }
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Write `"<driver> <timeline> seq <n> [un]signalled"`
    pub fn describe<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        let driver = self.driver_name();
        let timeline = self.timeline_name();
        write!(
            out,
            "{} {} seq {} {}signalled",
            driver,
            timeline,
            self.seqno,
            if self.test_signaled_flag() { "" } else { "un" }
        )
    }
}

impl fmt::Display for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.describe(f)
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("context", &self.context)
            .field("seqno", &self.seqno)
            .field("flags", &self.flags())
            .field("error", &self.error())
            .field("timestamp", &self.timestamp())
            .finish_non_exhaustive()
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        log::trace!(
            "dma-fence: destroy context {} seqno {}",
            self.context,
            self.seqno
        );

        let has_callbacks = !self.callbacks.get_mut().is_empty();
        if has_callbacks && !self.test_signaled_flag() {
            log::error!(
                "dma-fence: fence {}:{}:{:#x}:{:#x} released with pending signals!",
                self.driver_name(),
                self.timeline_name(),
                self.context,
                self.seqno
            );

            // Most likely a refcounting bug in the owner. Complete the fence
            // with an error so nobody waits on it forever.
            let lock = Arc::clone(&self.lock);
            let mut guard = lock.lock();
            self.error.store(Errno::EDEADLK.as_raw(), Ordering::Release);
            let _ = self.signal_locked(&mut guard);
        }

        self.ops.release(self);
    }
}
