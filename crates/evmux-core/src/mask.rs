//! Readiness event mask
//!
//! Watchers express interest, and backends report readiness, with the
//! same two-flag mask. A descriptor with an empty mask is not watched.

use bitflags::bitflags;

/// Loop timestamp / interval in seconds (fractional).
pub type Tstamp = f64;

bitflags! {
    /// Set of readiness kinds for one descriptor.
    ///
    /// Used both as the desired interest passed to `Backend::modify`
    /// and as the fired events passed to `LoopHooks::dispatch`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u32 {
        /// Descriptor is (or should be reported when) readable.
        const READ  = 0b0000_0001;
        /// Descriptor is (or should be reported when) writable.
        const WRITE = 0b0000_0010;
    }
}

impl EventMask {
    #[inline]
    pub fn is_readable(&self) -> bool {
        self.contains(EventMask::READ)
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.contains(EventMask::WRITE)
    }
}
