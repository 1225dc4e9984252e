//! # Helix DMA Fence
//!
//! Cross-driver completion fences for the Helix kernel.
//!
//! A DMA fence stands for a piece of asynchronous work (GPU rendering, a
//! display flip, video decode) that some other driver or userspace needs to
//! wait for. The producing driver signals it exactly once; consumers block on
//! it or register callbacks.
//!
//! ## Components
//!
//! - **Fence**: identity (context, seqno), one-way state, completion error,
//!   callback list, driver ops ([`fence`], [`ops`], [`flags`])
//! - **Context Allocator**: disjoint timeline ids ([`context`])
//! - **Callbacks**: caller-owned one-shot registrations ([`callback`])
//! - **Waits**: single fence and any-of-N, with timeouts ([`wait`])
//! - **Host Scheduler**: suspend/wake/clock backend ([`sched`])
//! - **Signalling Sections**: deadlock annotations ([`signalling`])
//! - **Stub Fences**: always-signaled placeholders ([`stub`])
//!
//! ## Usage
//!
//! ```rust,ignore
//! use helix_dma_fence::{context_alloc, Fence, FenceCallback, FenceLock, Timeout};
//!
//! let ctx = context_alloc(1);
//! let lock = Arc::new(FenceLock::new("gfx-ring"));
//! let fence = Fence::new(ring_ops.clone(), lock, ctx, 1);
//!
//! // Consumer
//! let cb = FenceCallback::new();
//! fence.add_callback(&cb, |f| log::info!("done: {}", f))?;
//! fence.wait_timeout(true, Timeout::from_millis(100))?;
//!
//! // Producer (IRQ handler)
//! fence.signal()?;
//! ```
//!
//! ## Locking
//!
//! Each fence is protected by a caller-supplied [`FenceLock`] spinlock.
//! Callbacks run with it held; waits must never be entered with it held.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod callback;
pub mod context;
pub mod error;
pub mod fence;
pub mod flags;
pub mod lock;
pub mod ops;
pub mod sched;
pub mod signalling;
pub mod stub;
pub mod time;
pub mod wait;

#[cfg(all(test, feature = "std"))]
mod testing;

// Re-exports for convenience
pub use callback::{CallbackFn, FenceCallback};
pub use context::{context_alloc, ContextAllocator, ContextRange, STUB_CONTEXT};
pub use error::{Errno, FenceError, FenceResult};
pub use fence::{Fence, FenceStatus, DETACHED_DRIVER_NAME, SIGNALED_TIMELINE_NAME};
pub use flags::FenceFlags;
pub use lock::{FenceGuard, FenceLock};
pub use ops::FenceOps;
pub use sched::{set_scheduler, Scheduler, Task};
pub use signalling::{begin_signalling, end_signalling, might_wait, SignallingSection};
pub use stub::{allocate_private_stub, get_stub};
pub use time::{Timeout, Timestamp};
pub use wait::{default_wait, wait_any_timeout, WaitAny, WaitStatus};

// =============================================================================
// COMPILE-TIME CHECKS
// =============================================================================

static_assertions::assert_impl_all!(Fence: Send, Sync);
static_assertions::assert_impl_all!(FenceCallback: Send, Sync);
static_assertions::assert_impl_all!(FenceLock: Send, Sync);
static_assertions::assert_eq_size!(Timeout, u64);
static_assertions::assert_eq_size!(Timestamp, u64);
static_assertions::assert_eq_size!(Errno, i32);
