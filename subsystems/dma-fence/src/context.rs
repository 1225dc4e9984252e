//! # Fence Context Allocator
//!
//! Each execution timeline (a GPU ring, a display pipe, a codec queue) owns a
//! fence context. Fences sharing a context are totally ordered by seqno;
//! fences from different contexts cannot be compared.
//!
//! Context `0` is never handed out. It belongs to the stub fence.

use core::ops::Range;
use core::sync::atomic::{AtomicU64, Ordering};

/// Context id reserved for always-signaled stub fences
pub const STUB_CONTEXT: u64 = 0;

// =============================================================================
// CONTEXT RANGE
// =============================================================================

/// Contiguous block of reserved context ids `[base, base + len)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextRange {
    base: u64,
    len: u64,
}

impl ContextRange {
    /// First id in the block
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Number of ids in the block
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Always false, blocks are never empty
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Does the block contain `context`?
    pub const fn contains(&self, context: u64) -> bool {
        context >= self.base && context - self.base < self.len
    }

    /// Do two blocks share any id?
    pub const fn overlaps(&self, other: &ContextRange) -> bool {
        self.base < other.base + other.len && other.base < self.base + self.len
    }

    /// Nth id in the block
    pub fn get(&self, index: u64) -> Option<u64> {
        if index < self.len {
            Some(self.base + index)
        } else {
            None
        }
    }

    /// Iterate the ids of the block
    pub fn iter(&self) -> Range<u64> {
        self.base..self.base + self.len
    }
}

// =============================================================================
// ALLOCATOR
// =============================================================================

/// Monotonic context id allocator
///
/// Applications normally share [`ContextAllocator::global`]; separate
/// instances are useful for isolated id spaces (tests, virtual devices).
#[derive(Debug)]
pub struct ContextAllocator {
    next: AtomicU64,
}

static GLOBAL_CONTEXTS: ContextAllocator = ContextAllocator::new();

impl ContextAllocator {
    /// Create an allocator whose first id is 1
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(STUB_CONTEXT + 1),
        }
    }

    /// The process-wide allocator
    pub fn global() -> &'static ContextAllocator {
        &GLOBAL_CONTEXTS
    }

    /// Reserve `num` consecutive ids and return the first one
    ///
    /// # Panics
    /// If `num` is zero.
    pub fn alloc(&self, num: u32) -> u64 {
        assert!(num != 0, "fence context allocation of zero contexts");
        // 64-bit space is not expected to wrap
        self.next.fetch_add(u64::from(num), Ordering::Relaxed)
    }

    /// Reserve `num` consecutive ids as a [`ContextRange`]
    pub fn alloc_range(&self, num: u32) -> ContextRange {
        ContextRange {
            base: self.alloc(num),
            len: u64::from(num),
        }
    }
}

impl Default for ContextAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Reserve `num` context ids from the process-wide allocator
pub fn context_alloc(num: u32) -> u64 {
    GLOBAL_CONTEXTS.alloc(num)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_first_id_is_one() {
        let allocator = ContextAllocator::new();
        assert_eq!(allocator.alloc(1), 1);
        assert_eq!(allocator.alloc(4), 2);
        assert_eq!(allocator.alloc(1), 6);
    }

    #[test]
    fn test_range_helpers() {
        let allocator = ContextAllocator::new();
        let _ = allocator.alloc(9);
        let range = allocator.alloc_range(3);
        assert_eq!(range.base(), 10);
        assert_eq!(range.len(), 3);
        assert!(range.contains(12));
        assert!(!range.contains(13));
        assert!(!range.contains(STUB_CONTEXT));
        assert_eq!(range.get(2), Some(12));
        assert_eq!(range.get(3), None);
        assert_eq!(range.iter().collect::<Vec<_>>(), [10, 11, 12]);
    }

    #[test]
    #[should_panic(expected = "zero contexts")]
    fn test_zero_count_panics() {
        ContextAllocator::new().alloc(0);
    }

    #[test]
    fn test_global_never_hands_out_stub_context() {
        let base = context_alloc(2);
        assert_ne!(base, STUB_CONTEXT);
        assert!(context_alloc(1) >= base + 2);
    }

    #[test]
    fn test_concurrent_ranges_disjoint() {
        use std::sync::Arc;
        use std::thread;

        let allocator = Arc::new(ContextAllocator::new());
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let allocator = Arc::clone(&allocator);
                thread::spawn(move || {
                    (0..200u32)
                        .map(|i| allocator.alloc_range(1 + (t + i) % 5))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ranges: Vec<ContextRange> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ranges.sort_by_key(|r| r.base());

        for pair in ranges.windows(2) {
            assert!(!pair[0].overlaps(&pair[1]), "{:?} overlaps {:?}", pair[0], pair[1]);
            assert_eq!(pair[0].base() + pair[0].len(), pair[1].base());
        }
    }
}
