//! # Fence Waits
//!
//! Blocking waits are built on the same callback mechanism external users
//! get: the waiter queues a callback that wakes its own task, then sleeps
//! until the fence is signaled, the budget runs out, or (for interruptible
//! waits) the task receives a signal. No polling.
//!
//! ## Return convention
//!
//! | Outcome | Result |
//! |---|---|
//! | signaled before the deadline | `Ok(Signaled { remaining })`, `remaining > 0` |
//! | budget exhausted | `Ok(TimedOut)` |
//! | interrupted (interruptible waits only) | `Err(FenceError::Interrupted)` |

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::callback::FenceCallback;
use crate::error::{FenceError, FenceResult};
use crate::fence::Fence;
use crate::sched::{self, Task};
use crate::signalling;
use crate::time::Timeout;

// =============================================================================
// RESULTS
// =============================================================================

/// Outcome of a single-fence wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The fence signaled; `remaining` is the unused budget, never zero
    Signaled {
        /// Unused part of the timeout
        remaining: Timeout,
    },
    /// The timeout expired first
    TimedOut,
}

impl WaitStatus {
    /// Did the fence signal?
    pub fn is_signaled(&self) -> bool {
        matches!(self, Self::Signaled { .. })
    }

    /// Unused budget if signaled
    pub fn remaining(&self) -> Option<Timeout> {
        match self {
            Self::Signaled { remaining } => Some(*remaining),
            Self::TimedOut => None,
        }
    }

    fn signaled(remaining: Timeout) -> Self {
        Self::Signaled {
            remaining: remaining.max(Timeout::MIN),
        }
    }
}

/// Outcome of a wait on several fences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitAny {
    /// Fence `index` signaled; the lowest index wins when several did
    Signaled {
        /// Position of the signaled fence in the input slice
        index: usize,
        /// Unused part of the timeout, never zero
        remaining: Timeout,
    },
    /// No fence signaled in time
    TimedOut,
}

impl WaitAny {
    /// Index of the signaled fence, if any
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Signaled { index, .. } => Some(*index),
            Self::TimedOut => None,
        }
    }
}

// =============================================================================
// SINGLE FENCE
// =============================================================================

impl Fence {
    /// Wait for the fence to signal, for at most `timeout`
    ///
    /// Arms driver signalling first, then uses the driver's
    /// [`wait`](crate::FenceOps::wait) (by default [`default_wait`]). May
    /// sleep: never call it with the fence lock held or from inside a
    /// signalling critical section.
    pub fn wait_timeout(&self, interruptible: bool, timeout: Timeout) -> FenceResult<WaitStatus> {
        signalling::might_wait();
        self.enable_sw_signaling();

        log::trace!(
            "dma-fence: wait start context {} seqno {}",
            self.context(),
            self.seqno()
        );
        let ret = self.ops().wait(self, interruptible, timeout);
        log::trace!(
            "dma-fence: wait end context {} seqno {}: {:?}",
            self.context(),
            self.seqno(),
            ret
        );
        ret
    }

    /// Wait without a timeout
    pub fn wait(&self, interruptible: bool) -> FenceResult<()> {
        self.wait_timeout(interruptible, Timeout::INFINITE).map(|_| ())
    }
}

/// The stock wait: wake-callback plus sleep
///
/// Drivers overriding [`FenceOps::wait`](crate::FenceOps::wait) may fall back
/// to this.
pub fn default_wait(fence: &Fence, interruptible: bool, timeout: Timeout) -> FenceResult<WaitStatus> {
    let sched = sched::scheduler();
    let task = sched.current();

    let mut guard = fence.lock().lock();

    if fence.test_signaled_flag() {
        return Ok(WaitStatus::signaled(timeout));
    }
    if interruptible && task.signal_pending() {
        return Err(FenceError::Interrupted);
    }
    if timeout.is_zero() {
        return Ok(WaitStatus::TimedOut);
    }

    let cb = FenceCallback::new();
    let waker = Arc::clone(&task);
    fence.add_wake_callback_locked(&mut guard, &cb, Box::new(move |_: &Fence| waker.wake()));

    let mut remaining = timeout;
    let mut interrupted = false;
    while !fence.test_signaled_flag() && !remaining.is_zero() {
        drop(guard);
        // A signal landing here still wakes us: the wake is remembered
        remaining = sched.schedule_timeout(remaining);
        guard = fence.lock().lock();

        if !fence.test_signaled_flag()
            && !remaining.is_zero()
            && interruptible
            && task.signal_pending()
        {
            interrupted = true;
            break;
        }
    }

    let stale = fence.remove_callback_locked(&mut guard, &cb);
    let signaled = fence.test_signaled_flag();
    drop(guard);
    drop(stale);

    if signaled {
        Ok(WaitStatus::signaled(remaining))
    } else if interrupted {
        Err(FenceError::Interrupted)
    } else {
        Ok(WaitStatus::TimedOut)
    }
}

// =============================================================================
// ANY OF SEVERAL
// =============================================================================

fn first_signaled(fences: &[&Fence]) -> Option<usize> {
    fences.iter().position(|f| f.test_signaled_flag())
}

/// Wait until any of `fences` signals, for at most `timeout`
///
/// Reports the lowest index among the fences found signaled. An empty slice
/// is rejected with [`FenceError::InvalidArgument`].
///
/// Only the array of wait records is reserved fallibly and reported as
/// [`FenceError::OutOfMemory`]. Each record's node and wake closure are
/// ordinary `alloc` allocations and abort on exhaustion.
pub fn wait_any_timeout(
    fences: &[&Fence],
    interruptible: bool,
    timeout: Timeout,
) -> FenceResult<WaitAny> {
    if fences.is_empty() {
        log::warn!("dma-fence: wait_any_timeout on an empty fence list");
        return Err(FenceError::InvalidArgument);
    }

    if timeout.is_zero() {
        return Ok(fences
            .iter()
            .position(|f| f.is_signaled())
            .map_or(WaitAny::TimedOut, |index| WaitAny::Signaled {
                index,
                remaining: Timeout::MIN,
            }));
    }

    signalling::might_wait();

    let mut records: Vec<FenceCallback> = Vec::new();
    records
        .try_reserve_exact(fences.len())
        .map_err(|_| FenceError::OutOfMemory)?;
    records.extend(fences.iter().map(|_| FenceCallback::new()));

    let sched = sched::scheduler();
    let task: Arc<dyn Task> = sched.current();

    let mut registered = 0;
    let mut winner = None;
    for (i, fence) in fences.iter().enumerate() {
        let waker = Arc::clone(&task);
        if fence
            .add_callback(&records[i], move |_: &Fence| waker.wake())
            .is_err()
        {
            // Already signaled; an earlier fence may have signaled meanwhile
            winner = Some(first_signaled(&fences[..=i]).unwrap_or(i));
            break;
        }
        registered += 1;
    }

    let mut remaining = timeout;
    let mut interrupted = false;
    while winner.is_none() {
        winner = first_signaled(fences);
        if winner.is_some() || remaining.is_zero() {
            break;
        }
        if interruptible && task.signal_pending() {
            interrupted = true;
            break;
        }
        remaining = sched.schedule_timeout(remaining);
    }

    for (fence, cb) in fences.iter().zip(&records).take(registered) {
        fence.remove_callback(cb);
    }

    match winner {
        Some(index) => Ok(WaitAny::Signaled {
            index,
            remaining: remaining.max(Timeout::MIN),
        }),
        None if interrupted => Err(FenceError::Interrupted),
        None => Ok(WaitAny::TimedOut),
    }
}
