//! Fence state flags.

use core::sync::atomic::{AtomicU32, Ordering};

bitflags::bitflags! {
    /// Fence state bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FenceFlags: u32 {
        /// Fence completed; never cleared once set
        const SIGNALED = 1 << 0;
        /// Timestamp recorded at signal time is valid
        const TIMESTAMP = 1 << 1;
        /// Someone asked to be notified; driver signalling was armed
        const ENABLE_SIGNAL = 1 << 2;
        /// Seqno compares use all 64 bits instead of wrapping 32-bit math
        const SEQNO64 = 1 << 3;
    }
}

/// Atomic storage for [`FenceFlags`]
///
/// Reads need no lock. Writes happen under the fence lock, but are still
/// atomic so lock-free readers never see torn state.
#[derive(Debug)]
#[repr(transparent)]
pub(crate) struct AtomicFenceFlags(AtomicU32);

impl AtomicFenceFlags {
    pub(crate) const fn new(initial: FenceFlags) -> Self {
        Self(AtomicU32::new(initial.bits()))
    }

    pub(crate) fn load(&self) -> FenceFlags {
        FenceFlags::from_bits_retain(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn contains(&self, flag: FenceFlags) -> bool {
        self.load().contains(flag)
    }

    /// Set `flag`, returning whether it was already set
    pub(crate) fn test_and_set(&self, flag: FenceFlags) -> bool {
        let old = self.0.fetch_or(flag.bits(), Ordering::AcqRel);
        FenceFlags::from_bits_retain(old).contains(flag)
    }

    pub(crate) fn insert(&self, flag: FenceFlags) {
        self.0.fetch_or(flag.bits(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_and_set() {
        let flags = AtomicFenceFlags::new(FenceFlags::SEQNO64);
        assert!(!flags.test_and_set(FenceFlags::SIGNALED));
        assert!(flags.test_and_set(FenceFlags::SIGNALED));
        assert!(flags.contains(FenceFlags::SIGNALED | FenceFlags::SEQNO64));
        assert!(!flags.contains(FenceFlags::TIMESTAMP));
        flags.insert(FenceFlags::TIMESTAMP);
        assert_eq!(
            flags.load(),
            FenceFlags::SIGNALED | FenceFlags::SEQNO64 | FenceFlags::TIMESTAMP
        );
    }
}
