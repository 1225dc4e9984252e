//! # Signalling Critical Sections
//!
//! Any code that must eventually reach [`Fence::signal`](crate::Fence::signal)
//! for some fence is a *signalling critical section*: a GPU job's completion
//! handler, a scheduler's run-job path, a reset handler. If such code blocks
//! on something that is itself waiting for a fence, nothing ever signals and
//! every waiter hangs.
//!
//! Bracket those paths:
//!
//! ```rust,ignore
//! let cookie = begin_signalling();
//! // ... work that leads to fence.signal() ...
//! end_signalling(cookie);
//!
//! // or, scoped:
//! let _section = SignallingSection::enter();
//! ```
//!
//! Waits call [`might_wait`]. With the `std` feature the calling thread's
//! section state is tracked, and a wait issued inside a signalling section is
//! reported as a lock-order violation (a panic with the `lockdep` feature).
//! Sections nest; inner sections collapse into the outermost. Contexts that
//! cannot sleep (`Scheduler::in_atomic`) are not tracked.
//!
//! The check is stricter than a lock-dependency validator: it does not
//! model which locks are held at the wait, it flags every wait issued while
//! the thread is inside a section, even one that could never close a cycle.
//!
//! Without `std` the calls are structural markers only.

/// Enter a signalling critical section
///
/// Returns a cookie for [`end_signalling`]: `true` when the call was nested
/// inside an existing section or made from atomic context, in which case
/// ending it is a no-op.
#[must_use = "pass the cookie to end_signalling"]
pub fn begin_signalling() -> bool {
    imp::begin()
}

/// Leave a signalling critical section entered with [`begin_signalling`]
pub fn end_signalling(cookie: bool) {
    if cookie {
        return;
    }
    imp::end();
}

/// Annotate that the caller may block on a fence
///
/// Called by every fence wait. Drivers whose waits bypass this crate should
/// call it too.
pub fn might_wait() {
    imp::might_wait();
}

/// Is the calling context inside a signalling critical section?
pub fn in_signalling() -> bool {
    imp::held()
}

/// Scoped signalling critical section
#[derive(Debug)]
#[must_use = "the section ends when the guard is dropped"]
pub struct SignallingSection {
    cookie: bool,
}

impl SignallingSection {
    /// Enter a section that ends when the guard drops
    pub fn enter() -> Self {
        Self {
            cookie: begin_signalling(),
        }
    }
}

impl Drop for SignallingSection {
    fn drop(&mut self) {
        end_signalling(self.cookie);
    }
}

#[cfg(feature = "std")]
mod imp {
    use core::cell::Cell;

    use crate::sched;

    std::thread_local! {
        static HELD: Cell<bool> = const { Cell::new(false) };
    }

    pub(super) fn held() -> bool {
        HELD.with(Cell::get)
    }

    pub(super) fn begin() -> bool {
        if held() {
            return true;
        }
        if sched::scheduler().in_atomic() {
            return true;
        }
        HELD.with(|h| h.set(true));
        false
    }

    pub(super) fn end() {
        HELD.with(|h| h.set(false));
    }

    pub(super) fn might_wait() {
        if !held() {
            return;
        }
        log::error!(
            "dma-fence: possible deadlock, fence wait inside a signalling critical section \
             (thread {:?})",
            std::thread::current().name()
        );
        #[cfg(feature = "lockdep")]
        panic!("fence wait inside a signalling critical section");
    }
}

#[cfg(not(feature = "std"))]
mod imp {
    pub(super) fn held() -> bool {
        false
    }

    pub(super) fn begin() -> bool {
        false
    }

    pub(super) fn end() {}

    pub(super) fn might_wait() {}
}
