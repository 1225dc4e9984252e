//! # Fence Error Handling
//!
//! Two different kinds of failure live here and must not be confused:
//!
//! - [`FenceError`]: the synchronization primitive itself could not do what
//!   was asked (already signaled, interrupted wait, allocation failure).
//! - [`Errno`]: the *payload* error a driver attaches to a fence before
//!   signalling it ("the GPU job failed"). It is carried on the fence and read
//!   back through [`Fence::status`](crate::Fence::status).

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// Result type for fence operations
pub type FenceResult<T> = Result<T, FenceError>;

// =============================================================================
// FENCE ERROR
// =============================================================================

/// Errors returned by fence operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FenceError {
    /// The fence was already signaled; the second signal had no effect
    AlreadySignaled,
    /// The fence is signaled, so no callback was installed
    NotFound,
    /// An interruptible wait was interrupted by a pending task signal
    Interrupted,
    /// Memory for wait records could not be allocated
    OutOfMemory,
    /// Caller passed an argument violating the API contract
    InvalidArgument,
    /// A global resource (scheduler backend) was already installed
    AlreadyInstalled,
}

impl FenceError {
    /// Kernel-style errno for drivers that speak raw codes
    pub const fn to_errno(self) -> Errno {
        match self {
            Self::AlreadySignaled | Self::InvalidArgument => Errno::EINVAL,
            Self::NotFound => Errno::ENOENT,
            Self::Interrupted => Errno::ERESTARTSYS,
            Self::OutOfMemory => Errno::ENOMEM,
            Self::AlreadyInstalled => Errno::EBUSY,
        }
    }
}

impl fmt::Display for FenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadySignaled => write!(f, "fence already signaled"),
            Self::NotFound => write!(f, "fence signaled, no callback installed"),
            Self::Interrupted => write!(f, "wait interrupted"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::AlreadyInstalled => write!(f, "already installed"),
        }
    }
}

// =============================================================================
// ERRNO
// =============================================================================

/// Negative kernel errno carried as a fence completion error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Errno(i32);

impl Errno {
    /// No such entry
    pub const ENOENT: Self = Self(-2);
    /// I/O error (typical "the job failed" code)
    pub const EIO: Self = Self(-5);
    /// Out of memory
    pub const ENOMEM: Self = Self(-12);
    /// Device or resource busy
    pub const EBUSY: Self = Self(-16);
    /// Invalid argument
    pub const EINVAL: Self = Self(-22);
    /// Resource deadlock would occur; set when a fence dies unsignaled
    pub const EDEADLK: Self = Self(-35);
    /// Timer expired
    pub const ETIMEDOUT: Self = Self(-110);
    /// Operation canceled
    pub const ECANCELED: Self = Self(-125);
    /// Interrupted by a signal, restartable
    pub const ERESTARTSYS: Self = Self(-512);

    /// Largest errno magnitude accepted
    pub const MAX_ERRNO: i32 = 4095;

    /// Build from a raw code, accepting only negative errnos
    pub const fn new(raw: i32) -> Option<Self> {
        if raw < 0 && raw >= -Self::MAX_ERRNO {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Raw negative value
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::ENOENT => "ENOENT",
            Self::EIO => "EIO",
            Self::ENOMEM => "ENOMEM",
            Self::EBUSY => "EBUSY",
            Self::EINVAL => "EINVAL",
            Self::EDEADLK => "EDEADLK",
            Self::ETIMEDOUT => "ETIMEDOUT",
            Self::ECANCELED => "ECANCELED",
            Self::ERESTARTSYS => "ERESTARTSYS",
            _ => return write!(f, "errno {}", self.0),
        };
        write!(f, "{} ({})", name, self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_range() {
        assert_eq!(Errno::new(-35), Some(Errno::EDEADLK));
        assert_eq!(Errno::new(0), None);
        assert_eq!(Errno::new(5), None);
        assert_eq!(Errno::new(-4096), None);
        assert!(Errno::new(-Errno::MAX_ERRNO).is_some());
    }

    #[test]
    fn test_error_to_errno() {
        assert_eq!(FenceError::Interrupted.to_errno(), Errno::ERESTARTSYS);
        assert_eq!(FenceError::NotFound.to_errno(), Errno::ENOENT);
        assert_eq!(FenceError::OutOfMemory.to_errno(), Errno::ENOMEM);
    }

    #[test]
    fn test_display() {
        use alloc::string::ToString;
        assert_eq!(Errno::EDEADLK.to_string(), "EDEADLK (-35)");
        assert_eq!(Errno(-77).to_string(), "errno -77");
        assert_eq!(FenceError::Interrupted.to_string(), "wait interrupted");
    }
}
