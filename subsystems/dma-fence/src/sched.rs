//! # Host Scheduler Interface
//!
//! Blocking waits need three things from the host: a handle to the current
//! task that another context can wake, a way to suspend the current task with
//! a timeout, and a monotonic clock. These are modelled as the [`Task`] and
//! [`Scheduler`] traits.
//!
//! A backend is installed once with [`set_scheduler`]. With the `std`
//! feature, [`ThreadScheduler`] (OS threads, park/unpark) is used when nothing
//! else was installed.

use alloc::sync::Arc;

use spin::Once;

use crate::error::{FenceError, FenceResult};
use crate::time::{Timeout, Timestamp};

// =============================================================================
// TRAITS
// =============================================================================

/// A schedulable execution context that can be woken from elsewhere
pub trait Task: Send + Sync {
    /// Make the task runnable
    ///
    /// Must be callable from any context, including with a fence lock held.
    /// A wake that arrives before the task suspends must not be lost: the
    /// next [`Scheduler::schedule_timeout`] returns promptly.
    fn wake(&self);

    /// Does the task have a pending signal that should end interruptible waits?
    fn signal_pending(&self) -> bool;
}

/// Host scheduler backend
pub trait Scheduler: Send + Sync {
    /// Handle to the calling task
    fn current(&self) -> Arc<dyn Task>;

    /// Suspend the calling task for at most `timeout`
    ///
    /// Returns the unused budget, zero when the timeout expired. An infinite
    /// timeout is returned unchanged. Spurious early returns are allowed.
    fn schedule_timeout(&self, timeout: Timeout) -> Timeout;

    /// Current monotonic time
    fn now(&self) -> Timestamp;

    /// Is the caller in a context that must not sleep?
    fn in_atomic(&self) -> bool {
        false
    }
}

// =============================================================================
// GLOBAL BACKEND
// =============================================================================

static SCHEDULER: Once<&'static dyn Scheduler> = Once::new();

/// Install the host scheduler backend
///
/// Fails with [`FenceError::AlreadyInstalled`] if a backend is already in use.
pub fn set_scheduler(scheduler: &'static dyn Scheduler) -> FenceResult<()> {
    let mut installed = false;
    SCHEDULER.call_once(|| {
        installed = true;
        scheduler
    });
    if installed {
        log::info!("dma-fence: host scheduler installed");
        Ok(())
    } else {
        Err(FenceError::AlreadyInstalled)
    }
}

/// The active scheduler backend
///
/// # Panics
/// Without the `std` feature, if no backend was installed.
pub fn scheduler() -> &'static dyn Scheduler {
    #[cfg(feature = "std")]
    {
        *SCHEDULER.call_once(|| &thread::THREAD_SCHEDULER as &'static dyn Scheduler)
    }
    #[cfg(not(feature = "std"))]
    {
        *SCHEDULER
            .get()
            .expect("dma-fence: no host scheduler installed")
    }
}

/// Current monotonic time from the active backend
pub fn now() -> Timestamp {
    scheduler().now()
}

#[cfg(feature = "std")]
pub use thread::{current_thread_task, ThreadScheduler, ThreadTask};

// =============================================================================
// STD BACKEND
// =============================================================================

#[cfg(feature = "std")]
mod thread {
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicBool, Ordering};
    use std::sync::OnceLock;
    use std::thread::{self, Thread};
    use std::time::Instant;

    use super::{Scheduler, Task};
    use crate::time::{Timeout, Timestamp};

    pub(super) static THREAD_SCHEDULER: ThreadScheduler = ThreadScheduler;

    std::thread_local! {
        static CURRENT: Arc<ThreadTask> = Arc::new(ThreadTask::new(thread::current()));
    }

    /// An OS thread seen as a [`Task`]
    ///
    /// "Signals" are modelled by an interrupt flag: [`ThreadTask::interrupt`]
    /// marks the task and unparks it, interruptible waits then return
    /// [`FenceError::Interrupted`](crate::FenceError::Interrupted) until the
    /// flag is cleared.
    #[derive(Debug)]
    pub struct ThreadTask {
        thread: Thread,
        interrupted: AtomicBool,
    }

    impl ThreadTask {
        fn new(thread: Thread) -> Self {
            Self {
                thread,
                interrupted: AtomicBool::new(false),
            }
        }

        /// Post a pending signal and kick the thread out of any sleep
        pub fn interrupt(&self) {
            self.interrupted.store(true, Ordering::Release);
            self.thread.unpark();
        }

        /// Drop the pending signal
        pub fn clear_interrupt(&self) {
            self.interrupted.store(false, Ordering::Release);
        }
    }

    impl Task for ThreadTask {
        fn wake(&self) {
            self.thread.unpark();
        }

        fn signal_pending(&self) -> bool {
            self.interrupted.load(Ordering::Acquire)
        }
    }

    /// Handle to the calling thread's task
    pub fn current_thread_task() -> Arc<ThreadTask> {
        CURRENT.with(Arc::clone)
    }

    /// Scheduler backend on top of OS threads
    ///
    /// Park/unpark keeps a wake token, so a wake racing ahead of the sleep is
    /// never lost.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ThreadScheduler;

    fn epoch() -> Instant {
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        *EPOCH.get_or_init(Instant::now)
    }

    impl Scheduler for ThreadScheduler {
        fn current(&self) -> Arc<dyn Task> {
            current_thread_task()
        }

        fn schedule_timeout(&self, timeout: Timeout) -> Timeout {
            match timeout.as_duration() {
                None => {
                    thread::park();
                    timeout
                }
                Some(budget) => {
                    let start = Instant::now();
                    thread::park_timeout(budget);
                    timeout.saturating_sub(start.elapsed())
                }
            }
        }

        fn now(&self) -> Timestamp {
            let ns = epoch().elapsed().as_nanos();
            Timestamp::from_nanos(u64::try_from(ns).unwrap_or(u64::MAX))
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_backend_is_threads() {
        let a = now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(now() > a);
    }

    #[test]
    fn test_second_install_rejected() {
        // The first access installs the std backend
        let _ = scheduler();
        assert_eq!(
            set_scheduler(&ThreadScheduler),
            Err(FenceError::AlreadyInstalled)
        );
    }

    #[test]
    fn test_schedule_timeout_expires() {
        let left = ThreadScheduler.schedule_timeout(Timeout::from_millis(5));
        // park_timeout may return spuriously early, never late with budget left over
        assert!(left <= Timeout::from_millis(5));
    }

    #[test]
    fn test_early_wake_not_lost() {
        let task = current_thread_task();
        task.wake();
        let left = ThreadScheduler.schedule_timeout(Timeout::from_millis(5_000));
        assert!(left > Timeout::from_millis(4_000));
    }

    #[test]
    fn test_interrupt_flag() {
        let task = current_thread_task();
        assert!(!task.signal_pending());
        task.interrupt();
        assert!(task.signal_pending());
        task.clear_interrupt();
        assert!(!task.signal_pending());
        // consume the unpark token left by interrupt()
        let _ = ThreadScheduler.schedule_timeout(Timeout::from_millis(1));
    }
}
