//! `SelectBackend` — `Backend` implementation over `select(2)`.
//!
//! Interest lives in two growable bitsets indexed by descriptor. Because
//! select overwrites its input sets, every poll first copies interest into
//! a pair of scratch sets, waits on those, then walks the result and
//! dispatches one notification per ready descriptor.
//!
//! All state belongs to the instance; several loops may each own one.
//! Growth reallocates the bitsets, which `&mut self` keeps from ever
//! overlapping a poll.

use std::os::fd::RawFd;

use evmux_core::{
    kdebug, ktrace, kwarn, Backend, BackendError, BackendFlags, BackendKind, Errno, EventMask,
    LoopHooks, PollFailure, Result, Tstamp,
};

use crate::bitset::{Bitmap, InterestStore, BITS_PER_WORD};
use crate::config::SelectConfig;
use crate::sys::{self, SysSelect, WaitPrimitive};

/// Readiness backend using growable fd bitmaps and a select-style wait.
pub struct SelectBackend<P: WaitPrimitive = SysSelect> {
    store: InterestStore,
    primitive: P,
    config: SelectConfig,
    fudge: Tstamp,
}

impl SelectBackend<SysSelect> {
    /// Set up an empty backend over the real `select(2)`.
    ///
    /// No buffers are allocated until the first `modify`. The caller's
    /// selection logic picks the strategy; `flags` is only recorded.
    pub fn init(flags: BackendFlags, config: SelectConfig) -> Result<Self> {
        Self::with_primitive(flags, config, SysSelect)
    }
}

impl<P: WaitPrimitive> SelectBackend<P> {
    /// Set up an empty backend over any wait primitive.
    ///
    /// Fails with `InvalidConfig` if `config` does not validate.
    pub fn with_primitive(flags: BackendFlags, config: SelectConfig, primitive: P) -> Result<Self> {
        config.validate()?;
        let fudge = config.fudge_secs();
        kdebug!(
            "init tag={} flags={:?} fudge={} max_descriptors={}",
            BackendKind::Select.name(),
            flags,
            fudge,
            config.max_descriptors
        );
        Ok(Self {
            store: InterestStore::new(),
            primitive,
            config,
            fudge,
        })
    }

    /// Strategy tag reported to the owning loop
    #[inline]
    pub fn kind(&self) -> BackendKind {
        BackendKind::Select
    }

    /// Declared fudge factor, fixed at init
    #[inline]
    pub fn fudge(&self) -> Tstamp {
        self.fudge
    }

    /// Validated configuration this backend runs with
    pub fn config(&self) -> &SelectConfig {
        &self.config
    }

    /// Capacity in bitmap words
    #[inline]
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Number of descriptors the current capacity covers
    #[inline]
    pub fn capacity_fds(&self) -> usize {
        self.store.capacity_fds()
    }

    /// Current interest registered for `fd`
    pub fn interest(&self, fd: RawFd) -> EventMask {
        match usize::try_from(fd) {
            Ok(index) => self.store.interest(index),
            Err(_) => EventMask::empty(),
        }
    }

    pub fn store(&self) -> &InterestStore {
        &self.store
    }

    pub fn primitive(&self) -> &P {
        &self.primitive
    }

    fn check_descriptor(&self, fd: RawFd) -> Result<usize> {
        let index = usize::try_from(fd).map_err(|_| BackendError::InvalidDescriptor(fd))?;
        if index >= self.config.max_descriptors {
            kwarn!(
                "fd {} rejected: select can watch descriptors below {}",
                fd,
                self.config.max_descriptors
            );
            return Err(BackendError::CapacityExceeded {
                fd,
                limit: self.config.max_descriptors,
            });
        }
        Ok(index)
    }

    /// Change the interest for `fd` from `old` to `new`.
    ///
    /// Equal masks are a no-op. Otherwise the bitsets grow to cover `fd`
    /// if needed and both bits are rewritten from `new`.
    pub fn modify(&mut self, fd: RawFd, old: EventMask, new: EventMask) -> Result<()> {
        if old == new {
            return Ok(());
        }

        let index = self.check_descriptor(fd)?;
        if let Some(prev) = self.store.ensure_capacity(index) {
            ktrace!(
                "grew interest sets {} -> {} words ({} fds)",
                prev,
                self.store.capacity(),
                self.store.capacity_fds()
            );
        }

        self.store.set(Bitmap::Read, index, new.is_readable());
        self.store.set(Bitmap::Write, index, new.is_writable());
        Ok(())
    }

    /// Wait up to `timeout` seconds and dispatch every ready descriptor.
    ///
    /// Descriptors are dispatched in ascending order, each at most once,
    /// with READ and/or WRITE set per the scratch result. Failures are
    /// reported through `hooks` and dispatch nothing.
    pub fn poll(&mut self, hooks: &mut dyn LoopHooks, timeout: Tstamp) {
        self.store.load_scratch();

        let tv = sys::to_timeval(timeout);
        let nfds = self.store.capacity() * BITS_PER_WORD;
        let (read, write) = self.store.scratch_mut();

        match self.primitive.wait(nfds, read, write, tv) {
            Ok(count) => {
                ktrace!("poll: {} ready of {} fds", count, nfds);
                for (fd, events) in self.store.ready() {
                    hooks.dispatch(fd as RawFd, events);
                }
            }
            Err(errno) => Self::report_failure(hooks, errno),
        }
    }

    fn report_failure(hooks: &mut dyn LoopHooks, errno: Errno) {
        match PollFailure::classify(errno, hooks.has_syserr_handler()) {
            PollFailure::BadDescriptor => {
                kdebug!("poll: bad descriptor in interest set");
                hooks.report_bad_descriptor();
            }
            PollFailure::OutOfMemory => {
                kdebug!("poll: out of kernel memory");
                hooks.report_out_of_memory();
            }
            PollFailure::Interrupted => {
                ktrace!("poll: interrupted");
            }
            PollFailure::System(errno) => {
                kwarn!("poll: select failed: {}", errno);
                hooks.report_system_error(errno);
            }
        }
    }

    /// Release all four bitsets; capacity drops back to zero.
    pub fn destroy(&mut self) {
        kdebug!("destroy: releasing {} words per set", self.store.capacity());
        self.store.release();
    }
}

impl<P: WaitPrimitive> Backend for SelectBackend<P> {
    fn kind(&self) -> BackendKind {
        SelectBackend::<P>::kind(self)
    }

    fn fudge(&self) -> Tstamp {
        SelectBackend::<P>::fudge(self)
    }

    fn modify(&mut self, fd: RawFd, old: EventMask, new: EventMask) -> Result<()> {
        SelectBackend::<P>::modify(self, fd, old, new)
    }

    fn poll(&mut self, hooks: &mut dyn LoopHooks, timeout: Tstamp) {
        SelectBackend::<P>::poll(self, hooks, timeout)
    }

    fn destroy(&mut self) {
        SelectBackend::<P>::destroy(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingHooks, ScriptedSelect, Step};

    const NONE: EventMask = EventMask::empty();
    const READ: EventMask = EventMask::READ;
    const WRITE: EventMask = EventMask::WRITE;
    const BOTH: EventMask = EventMask::READ.union(EventMask::WRITE);

    fn backend(steps: impl IntoIterator<Item = Step>) -> SelectBackend<ScriptedSelect> {
        SelectBackend::with_primitive(
            BackendFlags::SELECT,
            SelectConfig::new(),
            ScriptedSelect::new(steps),
        )
        .unwrap()
    }

    fn ready(read: &[usize], write: &[usize]) -> Step {
        Step::Ready {
            read: read.to_vec(),
            write: write.to_vec(),
        }
    }

    #[test]
    fn test_init_state() {
        let b = backend([]);
        assert_eq!(b.kind(), BackendKind::Select);
        assert_eq!(b.fudge(), 0.01);
        assert_eq!(b.capacity(), 0);
        assert!(b.store().read_interest().is_empty());
    }

    #[test]
    fn test_read_and_write_on_separate_fds() {
        let mut b = backend([ready(&[5], &[40])]);
        b.modify(5, NONE, READ).unwrap();
        b.modify(40, NONE, WRITE).unwrap();

        let mut hooks = RecordingHooks::new();
        b.poll(&mut hooks, 1.0);

        assert_eq!(hooks.dispatched, vec![(5, READ), (40, WRITE)]);
        assert_eq!(hooks.total(), 2);
    }

    #[test]
    fn test_high_fd_after_low_fd() {
        let mut b = backend([]);
        b.modify(5, NONE, READ).unwrap();
        let small = b.capacity();
        b.modify(40, NONE, WRITE).unwrap();
        assert!(b.capacity_fds() > 40);
        assert!(b.capacity() >= small);
        assert_eq!(b.interest(5), READ);
        assert_eq!(b.interest(40), WRITE);
    }

    #[test]
    fn test_second_word_growth_keeps_first_word() {
        let high = BITS_PER_WORD + 8;
        let mut b = backend([ready(&[5], &[high])]);
        b.modify(5, NONE, READ).unwrap();
        assert_eq!(b.capacity(), 1);

        b.modify(high as RawFd, NONE, WRITE).unwrap();
        assert_eq!(b.capacity(), 2);
        assert_eq!(b.interest(5), READ);
        assert_eq!(b.interest(high as RawFd), WRITE);

        let mut hooks = RecordingHooks::new();
        b.poll(&mut hooks, 1.0);
        assert_eq!(hooks.dispatched, vec![(5, READ), (high as RawFd, WRITE)]);
        assert_eq!(b.primitive().calls[0].nfds, 2 * BITS_PER_WORD);
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let too_many = libc::c_int::MAX as usize + 1;
        let res = SelectBackend::with_primitive(
            BackendFlags::SELECT,
            SelectConfig::new().max_descriptors(too_many),
            ScriptedSelect::default(),
        );
        assert_eq!(
            res.err(),
            Some(BackendError::InvalidConfig("max_descriptors must fit in a C int"))
        );

        let res = SelectBackend::init(BackendFlags::SELECT, SelectConfig::new().max_descriptors(0));
        assert!(matches!(res, Err(BackendError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_kept_after_init() {
        let config = SelectConfig::new().max_descriptors(128);
        let b = SelectBackend::with_primitive(
            BackendFlags::SELECT,
            config.clone(),
            ScriptedSelect::default(),
        )
        .unwrap();
        assert_eq!(b.config(), &config);
        assert_eq!(b.fudge(), config.fudge_secs());
    }

    #[test]
    fn test_only_fired_kind_reported() {
        let mut b = backend([ready(&[], &[3])]);
        b.modify(3, NONE, BOTH).unwrap();

        let mut hooks = RecordingHooks::new();
        b.poll(&mut hooks, 0.0);

        assert_eq!(hooks.dispatched, vec![(3, WRITE)]);
    }

    #[test]
    fn test_both_kinds_combined_once() {
        let mut b = backend([ready(&[3], &[3])]);
        b.modify(3, NONE, BOTH).unwrap();

        let mut hooks = RecordingHooks::new();
        b.poll(&mut hooks, 0.0);

        assert_eq!(hooks.dispatched, vec![(3, BOTH)]);
    }

    #[test]
    fn test_cleared_interest_drops_stale_scratch() {
        // First poll leaves fd 7 set in scratch; the second primitive call
        // hands scratch back untouched, so only the copied interest counts.
        let mut b = backend([ready(&[7], &[]), Step::Untouched]);
        b.modify(7, NONE, READ).unwrap();

        let mut hooks = RecordingHooks::new();
        b.poll(&mut hooks, 0.0);
        assert_eq!(hooks.dispatched, vec![(7, READ)]);

        b.modify(7, READ, NONE).unwrap();
        let mut hooks = RecordingHooks::new();
        b.poll(&mut hooks, 0.0);
        assert!(hooks.dispatched.is_empty());
        assert_eq!(hooks.total(), 0);
    }

    #[test]
    fn test_unwatched_ready_report_is_ignored() {
        let mut b = backend([ready(&[2, 7, 9], &[7])]);
        b.modify(9, NONE, READ).unwrap();

        let mut hooks = RecordingHooks::new();
        b.poll(&mut hooks, 0.0);
        assert_eq!(hooks.dispatched, vec![(9, READ)]);
    }

    #[test]
    fn test_modify_same_mask_is_noop() {
        let mut b = backend([]);
        b.modify(12, READ, READ).unwrap();
        assert_eq!(b.capacity(), 0);

        b.modify(12, NONE, BOTH).unwrap();
        let read_before = b.store().read_interest().clone();
        let write_before = b.store().write_interest().clone();
        let ptr_before = b.store().read_interest().words().as_ptr();

        b.modify(12, BOTH, BOTH).unwrap();
        b.modify(500, WRITE, WRITE).unwrap();

        assert_eq!(b.store().read_interest(), &read_before);
        assert_eq!(b.store().write_interest(), &write_before);
        assert_eq!(b.store().read_interest().words().as_ptr(), ptr_before);
    }

    #[test]
    fn test_modify_updates_kinds_independently() {
        let mut b = backend([]);
        b.modify(4, NONE, BOTH).unwrap();
        b.modify(4, BOTH, WRITE).unwrap();
        assert_eq!(b.interest(4), WRITE);

        b.modify(4, WRITE, READ).unwrap();
        assert_eq!(b.interest(4), READ);

        b.modify(4, READ, NONE).unwrap();
        assert!(b.interest(4).is_empty());
    }

    #[test]
    fn test_capacity_monotonic() {
        let mut b = backend([]);
        let mut last = 0;
        for fd in [3, 200, 64, 0, 900, 17] {
            b.modify(fd, NONE, READ).unwrap();
            assert!(b.capacity() >= last);
            last = b.capacity();
        }
        b.modify(900, READ, NONE).unwrap();
        assert_eq!(b.capacity(), last);
    }

    #[test]
    fn test_growth_keeps_old_bits_and_zeroes_new() {
        let mut b = backend([]);
        b.modify(1, NONE, READ).unwrap();
        b.modify(2, NONE, WRITE).unwrap();
        let old_fds = b.capacity_fds();

        b.modify(700, NONE, BOTH).unwrap();
        assert_eq!(b.interest(1), READ);
        assert_eq!(b.interest(2), WRITE);
        for fd in old_fds..b.capacity_fds() {
            if fd != 700 {
                assert!(b.interest(fd as RawFd).is_empty(), "fd {}", fd);
            }
        }
    }

    #[test]
    fn test_rejects_negative_and_oversized() {
        let mut b = SelectBackend::with_primitive(
            BackendFlags::SELECT,
            SelectConfig::new().max_descriptors(64),
            ScriptedSelect::default(),
        )
        .unwrap();

        assert_eq!(b.modify(-1, NONE, READ), Err(BackendError::InvalidDescriptor(-1)));
        assert_eq!(
            b.modify(64, NONE, READ),
            Err(BackendError::CapacityExceeded { fd: 64, limit: 64 })
        );
        assert_eq!(b.capacity(), 0);

        b.modify(63, NONE, READ).unwrap();
        assert_eq!(b.interest(63), READ);
    }

    #[test]
    fn test_poll_copies_interest_and_timeout() {
        let mut b = backend([]);
        b.modify(1, NONE, READ).unwrap();
        b.modify(2, NONE, WRITE).unwrap();

        let mut hooks = RecordingHooks::new();
        b.poll(&mut hooks, 2.75);

        let call = &b.primitive().calls[0];
        assert_eq!(call.nfds, b.capacity() * BITS_PER_WORD);
        assert_eq!(call.read_in[0], 0b010);
        assert_eq!(call.write_in[0], 0b100);
        assert_eq!(call.timeout, (2, 750_000));
        assert!(hooks.dispatched.is_empty());
    }

    #[test]
    fn test_poll_with_nothing_registered() {
        let mut b = backend([]);
        let mut hooks = RecordingHooks::new();
        b.poll(&mut hooks, 0.0);

        assert_eq!(b.primitive().calls[0].nfds, 0);
        assert_eq!(hooks.total(), 0);
    }

    #[test]
    fn test_interrupted_is_silent() {
        let mut b = backend([Step::Fail(Errno::EINTR)]);
        b.modify(3, NONE, READ).unwrap();

        let mut hooks = RecordingHooks::new();
        b.poll(&mut hooks, 5.0);
        assert_eq!(hooks.total(), 0);
    }

    #[test]
    fn test_bad_descriptor_reported_once() {
        let mut b = backend([Step::Fail(Errno::EBADF)]);
        b.modify(3, NONE, READ).unwrap();

        let mut hooks = RecordingHooks::new();
        b.poll(&mut hooks, 0.0);
        assert_eq!(hooks.bad_descriptor, 1);
        assert_eq!(hooks.total(), 1);
    }

    #[test]
    fn test_enomem_without_handler_is_out_of_memory() {
        let mut b = backend([Step::Fail(Errno::ENOMEM)]);
        b.modify(3, NONE, READ).unwrap();

        let mut hooks = RecordingHooks::new();
        b.poll(&mut hooks, 0.0);
        assert_eq!(hooks.out_of_memory, 1);
        assert_eq!(hooks.total(), 1);
    }

    #[test]
    fn test_enomem_with_handler_is_system_error() {
        let mut b = backend([Step::Fail(Errno::ENOMEM)]);
        b.modify(3, NONE, READ).unwrap();

        let mut hooks = RecordingHooks::with_syserr_handler();
        b.poll(&mut hooks, 0.0);
        assert_eq!(hooks.out_of_memory, 0);
        assert_eq!(hooks.system_errors, vec![Errno::ENOMEM]);
        assert_eq!(hooks.total(), 1);
    }

    #[test]
    fn test_other_errno_is_system_error() {
        let mut b = backend([Step::Fail(Errno::EINVAL)]);
        b.modify(3, NONE, READ).unwrap();

        let mut hooks = RecordingHooks::new();
        b.poll(&mut hooks, 0.0);
        assert_eq!(hooks.system_errors, vec![Errno::EINVAL]);
        assert!(hooks.dispatched.is_empty());
    }

    #[test]
    fn test_each_ready_fd_dispatched_exactly_once() {
        let reads: Vec<usize> = (0..300).step_by(7).collect();
        let writes: Vec<usize> = (0..300).step_by(11).collect();
        let mut b = backend([ready(&reads, &writes)]);
        for fd in 0..300 {
            b.modify(fd, NONE, BOTH).unwrap();
        }

        let mut hooks = RecordingHooks::new();
        b.poll(&mut hooks, 0.0);

        let mut expected = Vec::new();
        for fd in 0..300usize {
            let mut ev = EventMask::empty();
            if fd % 7 == 0 {
                ev |= READ;
            }
            if fd % 11 == 0 {
                ev |= WRITE;
            }
            if !ev.is_empty() {
                expected.push((fd as RawFd, ev));
            }
        }
        assert_eq!(hooks.dispatched, expected);
    }

    #[test]
    fn test_destroy_releases_buffers() {
        let mut b = backend([]);
        b.modify(100, NONE, READ).unwrap();
        assert!(b.capacity() > 0);

        b.destroy();
        assert_eq!(b.capacity(), 0);
        assert!(b.interest(100).is_empty());
    }

    #[test]
    fn test_through_trait_object() {
        let mut b: Box<dyn Backend> = Box::new(backend([ready(&[6], &[])]));
        assert_eq!(b.name(), "select");
        b.modify(6, NONE, READ).unwrap();

        let mut hooks = RecordingHooks::new();
        b.poll(&mut hooks, 0.0);
        assert_eq!(hooks.dispatched, vec![(6, READ)]);
        b.destroy();
    }
}
