//! The wait primitive behind the select backend.
//!
//! `WaitPrimitive` is the only seam where the backend touches the OS.
//! `SysSelect` forwards to `select(2)`; tests substitute a scripted one.

use std::ptr;

use evmux_core::{Errno, Tstamp};

use crate::bitset::Word;

/// Longest single wait. Some kernels reject `tv_sec` above 10^8.
pub const MAX_TIMEOUT: Tstamp = 1e8;

/// Blocking readiness wait over a pair of `fd_set`-layout word slices.
///
/// **Contract:**
/// - `read` and `write` have equal length and cover at least `nfds` bits.
/// - On success both slices are overwritten with the subset of their
///   input bits that are ready, and the ready count is returned.
/// - On failure the slices are unspecified and the errno is returned.
pub trait WaitPrimitive: Send {
    fn wait(
        &mut self,
        nfds: usize,
        read: &mut [Word],
        write: &mut [Word],
        timeout: libc::timeval,
    ) -> Result<usize, Errno>;
}

/// `select(2)` with no exception set.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysSelect;

impl WaitPrimitive for SysSelect {
    fn wait(
        &mut self,
        nfds: usize,
        read: &mut [Word],
        write: &mut [Word],
        timeout: libc::timeval,
    ) -> Result<usize, Errno> {
        debug_assert_eq!(read.len(), write.len());
        debug_assert!(nfds <= read.len() * crate::bitset::BITS_PER_WORD);

        // With nothing registered, select degenerates into a sleep.
        let (read_ptr, write_ptr) = if read.is_empty() {
            (ptr::null_mut(), ptr::null_mut())
        } else {
            (
                read.as_mut_ptr().cast::<libc::fd_set>(),
                write.as_mut_ptr().cast::<libc::fd_set>(),
            )
        };
        let mut tv = timeout;

        // SAFETY: both pointers are null or point at `nfds` bits of
        // word-aligned storage with the platform fd_set element layout.
        let res = unsafe {
            libc::select(
                c_nfds(nfds),
                read_ptr,
                write_ptr,
                ptr::null_mut(),
                &mut tv,
            )
        };
        if res < 0 {
            return Err(Errno::last());
        }
        Ok(res as usize)
    }
}

/// `nfds` as the C argument, saturating at `c_int::MAX`.
fn c_nfds(nfds: usize) -> libc::c_int {
    libc::c_int::try_from(nfds).unwrap_or(libc::c_int::MAX)
}

/// Split a timeout in seconds into whole seconds and microseconds.
///
/// Negative and NaN timeouts become zero (a single non-blocking check);
/// huge ones are capped at `MAX_TIMEOUT`. Microseconds are truncated, so
/// `tv_usec` stays below one million.
pub fn to_timeval(timeout: Tstamp) -> libc::timeval {
    let t = if timeout.is_nan() || timeout <= 0.0 {
        0.0
    } else {
        timeout.min(MAX_TIMEOUT)
    };
    let secs = t.trunc();
    let usecs = ((t - secs) * 1e6) as i64;

    libc::timeval {
        tv_sec: secs as libc::time_t,
        tv_usec: usecs as libc::suseconds_t,
    }
}
