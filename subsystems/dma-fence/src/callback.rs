//! # Fence Callbacks
//!
//! A [`FenceCallback`] is a caller-owned registration record. It is either
//! *idle* or *pending* on exactly one fence. Registering stores a one-shot
//! continuation; signalling unlinks the record and runs the continuation,
//! after which the record is idle again and may be reused.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::fence::Fence;

/// Continuation run when a fence signals
///
/// Runs with the fence lock held, possibly from interrupt context on the
/// signalling side: it must not block, sleep, or take the same fence lock.
pub type CallbackFn = Box<dyn FnOnce(&Fence) + Send + 'static>;

/// Shared node linked into a fence's callback list
pub(crate) struct CallbackNode {
    /// Linked into some fence's list; changed only under that fence's lock
    pending: AtomicBool,
    func: Mutex<Option<CallbackFn>>,
}

impl CallbackNode {
    pub(crate) fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Store the continuation and mark linked. Fence lock held.
    pub(crate) fn arm(&self, func: CallbackFn) {
        let mut slot = self.func.lock();
        *slot = Some(func);
        self.pending.store(true, Ordering::Release);
    }

    /// Hand back the continuation and mark unlinked. Fence lock held.
    ///
    /// `pending` is cleared only after the slot is emptied, both under the
    /// slot lock, so a record seen idle can be re-armed without its new
    /// continuation being taken by this fence.
    pub(crate) fn disarm(&self) -> Option<CallbackFn> {
        let mut slot = self.func.lock();
        let func = slot.take();
        self.pending.store(false, Ordering::Release);
        func
    }

    /// Unlink and run. Fence lock held.
    ///
    /// The node is idle before the continuation runs, so the continuation may
    /// register the same record again.
    pub(crate) fn fire(&self, fence: &Fence) {
        if let Some(func) = self.disarm() {
            func(fence);
        }
    }
}

/// Caller-owned callback registration record
///
/// Dropping a pending record does not cancel it; the continuation still runs
/// when the fence signals. Use [`Fence::remove_callback`] to cancel.
pub struct FenceCallback {
    node: Arc<CallbackNode>,
}

impl FenceCallback {
    /// Create an idle record
    pub fn new() -> Self {
        Self {
            node: Arc::new(CallbackNode {
                pending: AtomicBool::new(false),
                func: Mutex::new(None),
            }),
        }
    }

    /// Is the record currently linked into a fence?
    pub fn is_pending(&self) -> bool {
        self.node.is_pending()
    }

    pub(crate) fn node(&self) -> &Arc<CallbackNode> {
        &self.node
    }
}

impl Default for FenceCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FenceCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FenceCallback")
            .field("pending", &self.is_pending())
            .finish()
    }
}
