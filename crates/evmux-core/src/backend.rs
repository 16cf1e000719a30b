//! Readiness backend abstraction.
//!
//! A `Backend` waits for readiness on the descriptors the owning loop
//! registered and reports every ready (descriptor, events) pair back
//! through `LoopHooks`.
//!
//! # Implementors
//!
//! - `SelectBackend` (evmux-select): copies growable interest bitmaps into
//!   scratch sets and calls `select(2)`. Portable, O(max fd) per poll,
//!   bounded by the platform `FD_SETSIZE`.
//!
//! Other strategies (poll, epoll, kqueue, /dev/poll, event ports) have a
//! `BackendKind` tag so the loop's selection logic can name them, but are
//! not implemented in this workspace.
//!
//! ```text
//!   owning loop ──modify(fd, old, new)──► Backend
//!   owning loop ──poll(hooks, timeout)──► Backend ──dispatch(fd, ev)──► LoopHooks
//!                                                 ──report_*()───────► LoopHooks
//! ```

use std::os::fd::RawFd;

use bitflags::bitflags;
use nix::errno::Errno;

use crate::error::Result;
use crate::mask::{EventMask, Tstamp};

/// Strategy tag returned by a backend's init, identifying it to the
/// loop's backend-selection logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BackendKind {
    Select = 0x01,
    Poll = 0x02,
    Epoll = 0x04,
    Kqueue = 0x08,
    Devpoll = 0x10,
    Port = 0x20,
}

impl BackendKind {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Select => "select",
            BackendKind::Poll => "poll",
            BackendKind::Epoll => "epoll",
            BackendKind::Kqueue => "kqueue",
            BackendKind::Devpoll => "devpoll",
            BackendKind::Port => "port",
        }
    }

    /// The selection flag matching this strategy.
    pub fn flag(&self) -> BackendFlags {
        BackendFlags::from_bits_truncate(*self as u32)
    }
}

bitflags! {
    /// Mask of strategies the loop is willing to use, passed to init.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BackendFlags: u32 {
        const SELECT  = BackendKind::Select as u32;
        const POLL    = BackendKind::Poll as u32;
        const EPOLL   = BackendKind::Epoll as u32;
        const KQUEUE  = BackendKind::Kqueue as u32;
        const DEVPOLL = BackendKind::Devpoll as u32;
        const PORT    = BackendKind::Port as u32;
    }
}

/// Callbacks the backend uses to talk back to the owning loop.
///
/// A poll call's only externally visible effects are calls on this
/// trait: zero or more `dispatch` calls on success, or exactly one of the
/// `report_*` calls on failure (none for an interrupted wait).
pub trait LoopHooks {
    /// One descriptor became ready with the given events.
    ///
    /// Called at most once per descriptor per poll.
    fn dispatch(&mut self, fd: RawFd, events: EventMask);

    /// The interest set holds an invalid or closed descriptor.
    ///
    /// Recoverable: the loop should scan its watchers and drop the
    /// offending ones before the next poll.
    fn report_bad_descriptor(&mut self);

    /// The wait primitive ran out of kernel resources.
    ///
    /// Only called when `has_syserr_handler()` is false.
    fn report_out_of_memory(&mut self);

    /// Any other wait failure. Treated as fatal by the loop.
    fn report_system_error(&mut self, errno: Errno);

    /// Whether the application registered its own system-error handler.
    ///
    /// When true, resource exhaustion is reported through
    /// `report_system_error` instead of `report_out_of_memory`.
    fn has_syserr_handler(&self) -> bool {
        false
    }
}

/// A pluggable readiness-wait strategy.
///
/// **Contract:**
/// - `modify()` and `poll()` are never called concurrently; the loop
///   drives both from one thread.
/// - `poll()` never returns an error. Failures go through `LoopHooks`.
/// - `fudge()` is fixed at init and never changes afterwards.
pub trait Backend: Send {
    /// Strategy tag
    fn kind(&self) -> BackendKind;

    /// Backend name for debugging/logging
    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Time pad (seconds) the scheduler adds to every computed timeout.
    fn fudge(&self) -> Tstamp;

    /// Update interest for `fd` from `old` to `new`.
    ///
    /// A call with `old == new` must not touch any state.
    fn modify(&mut self, fd: RawFd, old: EventMask, new: EventMask) -> Result<()>;

    /// Block for up to `timeout` seconds and report readiness.
    fn poll(&mut self, hooks: &mut dyn LoopHooks, timeout: Tstamp);

    /// Release all buffers. Called once at loop teardown.
    fn destroy(&mut self);
}
