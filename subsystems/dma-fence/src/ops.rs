//! # Fence Operations
//!
//! The behaviour a driver plugs into its fences. Only the two name accessors
//! are required; everything else has a working default.

use crate::error::FenceResult;
use crate::fence::Fence;
use crate::time::{Timeout, Timestamp};
use crate::wait::{self, WaitStatus};

/// Driver-supplied fence behaviour
///
/// One implementation is usually shared by every fence of a driver (or of a
/// timeline) through an `Arc`.
pub trait FenceOps: Send + Sync {
    /// Name of the driver that created the fence
    ///
    /// Only called while the fence is unsignaled. After signalling, the driver
    /// may tear down whatever backs the string.
    fn driver_name<'a>(&'a self, fence: &'a Fence) -> &'a str;

    /// Name of the timeline the fence belongs to
    ///
    /// Same lifetime rules as [`FenceOps::driver_name`].
    fn timeline_name<'a>(&'a self, fence: &'a Fence) -> &'a str;

    /// Arm completion detection (interrupts, polling workers, ...)
    ///
    /// Called at most once, lazily, the first time someone needs to be
    /// notified, with the fence lock held. Returning `false` means the driver
    /// cannot guarantee the fence will ever be observed as complete; the fence
    /// is then signaled immediately, carrying whatever error was attached
    /// beforehand. The fence lock is held here, so the hook must not call
    /// [`Fence::set_error`]; attach the error before handing the fence out.
    fn enable_signaling(&self, fence: &Fence) -> bool {
        let _ = fence;
        true
    }

    /// Peek at the hardware: has the fence completed?
    ///
    /// Used by [`Fence::is_signaled`] to notice completion before the
    /// interrupt arrives. May be called without the fence lock, from any
    /// context.
    fn signaled(&self, fence: &Fence) -> bool {
        let _ = fence;
        false
    }

    /// Block until the fence signals, the timeout runs out, or (when
    /// `interruptible`) the task receives a signal
    ///
    /// Same return convention as [`Fence::wait_timeout`]. Override only when
    /// the hardware offers something better than callback + sleep.
    fn wait(&self, fence: &Fence, interruptible: bool, timeout: Timeout) -> FenceResult<WaitStatus> {
        wait::default_wait(fence, interruptible, timeout)
    }

    /// Called when the last reference to the fence is dropped
    ///
    /// The fence's own memory is released after this returns.
    fn release(&self, fence: &Fence) {
        let _ = fence;
    }

    /// Someone wants the fence signaled by `deadline`
    ///
    /// Pure hint (e.g. for a frequency governor); may be called many times
    /// and may be ignored.
    fn set_deadline(&self, fence: &Fence, deadline: Timestamp) {
        let _ = (fence, deadline);
    }
}
