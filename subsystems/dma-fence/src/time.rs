//! # Fence Time Units
//!
//! Monotonic timestamps (signal time, deadlines) and relative wait timeouts,
//! both in nanoseconds.

use core::fmt;
use core::time::Duration;

// =============================================================================
// TIMESTAMP
// =============================================================================

/// Point on the host monotonic clock, in nanoseconds since an arbitrary epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Clock origin
    pub const ZERO: Self = Self(0);

    /// Create from nanoseconds
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Nanoseconds since the clock origin
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Timestamp `by` after this one, saturating
    pub fn saturating_add(self, by: Duration) -> Self {
        Self(self.0.saturating_add(duration_nanos(by)))
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later
    pub fn saturating_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.0 / 1_000_000_000, self.0 % 1_000_000_000)
    }
}

// =============================================================================
// TIMEOUT
// =============================================================================

/// Relative wait budget in nanoseconds
///
/// [`Timeout::INFINITE`] is the "wait forever" sentinel and never decreases.
/// A zero timeout means "do not block, just test".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Timeout(u64);

impl Timeout {
    /// Do not block
    pub const ZERO: Self = Self(0);
    /// Smallest non-zero budget; reported when a zero-timeout wait succeeds
    pub const MIN: Self = Self(1);
    /// Wait forever
    pub const INFINITE: Self = Self(u64::MAX);

    /// Create from nanoseconds
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Create from milliseconds
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    /// Raw nanoseconds (`u64::MAX` for infinite)
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Is this the zero budget?
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Is this the infinite sentinel?
    pub const fn is_infinite(self) -> bool {
        self.0 == u64::MAX
    }

    /// Finite budget as a [`Duration`], `None` when infinite
    pub fn as_duration(self) -> Option<Duration> {
        if self.is_infinite() {
            None
        } else {
            Some(Duration::from_nanos(self.0))
        }
    }

    /// Budget left after spending `elapsed`; infinite stays infinite
    pub fn saturating_sub(self, elapsed: Duration) -> Self {
        if self.is_infinite() {
            self
        } else {
            Self(self.0.saturating_sub(duration_nanos(elapsed)))
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        // Clamp just below the sentinel so a huge finite duration stays finite
        Self(duration_nanos(d).min(u64::MAX - 1))
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
