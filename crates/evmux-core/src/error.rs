//! Error types for readiness backends

use core::fmt;
use std::os::fd::RawFd;

use nix::errno::Errno;

use crate::backend::BackendFlags;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors returned by backend construction and `Backend::modify`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Negative descriptor number
    InvalidDescriptor(RawFd),

    /// Descriptor is at or beyond what the wait primitive can represent
    CapacityExceeded { fd: RawFd, limit: usize },

    /// None of the requested strategies can be built here
    NoBackend(BackendFlags),

    /// Backend configuration rejected
    InvalidConfig(&'static str),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::InvalidDescriptor(fd) => write!(f, "invalid descriptor {}", fd),
            BackendError::CapacityExceeded { fd, limit } => {
                write!(f, "descriptor {} exceeds backend capacity {}", fd, limit)
            }
            BackendError::NoBackend(flags) => {
                write!(f, "no usable backend in {:?}", flags)
            }
            BackendError::InvalidConfig(msg) => write!(f, "invalid backend config: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// Classified outcome of a failed wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollFailure {
    /// EBADF: the interest set holds a closed or invalid descriptor
    BadDescriptor,

    /// ENOMEM with no custom system-error handler installed
    OutOfMemory,

    /// EINTR: a signal arrived; not an error
    Interrupted,

    /// Anything else, including ENOMEM when a custom handler exists
    System(Errno),
}

impl PollFailure {
    /// Map a wait primitive errno onto the failure taxonomy.
    pub fn classify(errno: Errno, has_syserr_handler: bool) -> Self {
        match errno {
            Errno::EBADF => PollFailure::BadDescriptor,
            Errno::ENOMEM if !has_syserr_handler => PollFailure::OutOfMemory,
            Errno::EINTR => PollFailure::Interrupted,
            other => PollFailure::System(other),
        }
    }
}

impl fmt::Display for PollFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollFailure::BadDescriptor => write!(f, "bad descriptor in interest set"),
            PollFailure::OutOfMemory => write!(f, "out of kernel memory"),
            PollFailure::Interrupted => write!(f, "interrupted"),
            PollFailure::System(errno) => write!(f, "system error: {}", errno),
        }
    }
}
