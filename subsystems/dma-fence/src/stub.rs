//! # Stub Fences
//!
//! Already-signaled fences for places that need "a fence" but have no work
//! to track, e.g. a buffer with no pending rendering.

use alloc::sync::Arc;

use spin::Once;

use crate::context::STUB_CONTEXT;
use crate::fence::Fence;
use crate::lock::FenceLock;
use crate::ops::FenceOps;
use crate::time::Timestamp;

struct StubOps;

impl FenceOps for StubOps {
    fn driver_name<'a>(&'a self, _fence: &'a Fence) -> &'a str {
        "stub"
    }

    fn timeline_name<'a>(&'a self, _fence: &'a Fence) -> &'a str {
        "stub"
    }
}

fn stub_lock() -> Arc<FenceLock> {
    static LOCK: Once<Arc<FenceLock>> = Once::new();
    Arc::clone(LOCK.call_once(|| Arc::new(FenceLock::new("dma-fence-stub"))))
}

fn new_stub() -> Arc<Fence> {
    let fence = Fence::new(Arc::new(StubOps), stub_lock(), STUB_CONTEXT, 0);
    fence.mark_signaling_enabled();
    fence
}

/// The shared, signaled stub fence
pub fn get_stub() -> Arc<Fence> {
    static STUB: Once<Arc<Fence>> = Once::new();
    Arc::clone(STUB.call_once(|| {
        let fence = new_stub();
        let _ = fence.signal();
        fence
    }))
}

/// A new signaled stub fence carrying `timestamp`
///
/// For callers that need a distinct fence object, or a specific signal time.
pub fn allocate_private_stub(timestamp: Timestamp) -> Arc<Fence> {
    let fence = new_stub();
    let _ = fence.signal_timestamp(timestamp);
    fence
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::{FenceCallback, FenceError, FenceFlags, FenceStatus, Timeout, WaitStatus};

    #[test]
    fn test_shared_stub() {
        let a = get_stub();
        let b = get_stub();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.context(), STUB_CONTEXT);
        assert_eq!(a.seqno(), 0);
        assert_eq!(a.status(), FenceStatus::Signaled);
        assert!(a.flags().contains(FenceFlags::ENABLE_SIGNAL | FenceFlags::TIMESTAMP));
        assert_eq!(
            a.wait_timeout(false, Timeout::ZERO),
            Ok(WaitStatus::Signaled { remaining: Timeout::MIN })
        );
    }

    #[test]
    fn test_private_stub() {
        let ts = Timestamp::from_nanos(1234);
        let fence = allocate_private_stub(ts);
        assert!(!Arc::ptr_eq(&fence, &get_stub()));
        assert_eq!(fence.timestamp(), Some(ts));
        assert_eq!(fence.status(), FenceStatus::Signaled);

        let cb = FenceCallback::new();
        assert_eq!(fence.add_callback(&cb, |_| {}), Err(FenceError::NotFound));
    }

    #[test]
    fn test_stub_names_before_signal() {
        let fence = new_stub();
        assert_eq!(fence.driver_name(), "stub");
        assert_eq!(fence.timeline_name(), "stub");
        fence.signal().unwrap();
        assert_eq!(fence.driver_name(), crate::DETACHED_DRIVER_NAME);
    }
}
