//! Test doubles: a recording loop and a scripted wait primitive.

use std::collections::VecDeque;
use std::os::fd::RawFd;

use evmux_core::{Errno, EventMask, LoopHooks};

use crate::bitset::{Word, BITS_PER_WORD};
use crate::sys::WaitPrimitive;

/// Loop stand-in that records every callback.
#[derive(Debug, Default)]
pub(crate) struct RecordingHooks {
    pub dispatched: Vec<(RawFd, EventMask)>,
    pub bad_descriptor: usize,
    pub out_of_memory: usize,
    pub system_errors: Vec<Errno>,
    pub custom_syserr: bool,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_syserr_handler() -> Self {
        Self {
            custom_syserr: true,
            ..Self::default()
        }
    }

    /// Total callbacks of any kind
    pub fn total(&self) -> usize {
        self.dispatched.len() + self.bad_descriptor + self.out_of_memory + self.system_errors.len()
    }
}

impl LoopHooks for RecordingHooks {
    fn dispatch(&mut self, fd: RawFd, events: EventMask) {
        self.dispatched.push((fd, events));
    }

    fn report_bad_descriptor(&mut self) {
        self.bad_descriptor += 1;
    }

    fn report_out_of_memory(&mut self) {
        self.out_of_memory += 1;
    }

    fn report_system_error(&mut self, errno: Errno) {
        self.system_errors.push(errno);
    }

    fn has_syserr_handler(&self) -> bool {
        self.custom_syserr
    }
}

/// What the scripted primitive does on its next call.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Report these descriptors ready, filtered by the input sets.
    Ready { read: Vec<usize>, write: Vec<usize> },
    /// Fail with this errno.
    Fail(Errno),
    /// Leave the scratch sets exactly as passed in.
    Untouched,
}

/// One recorded `wait` invocation.
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub nfds: usize,
    pub read_in: Vec<Word>,
    pub write_in: Vec<Word>,
    pub timeout: (i64, i64),
}

/// `WaitPrimitive` that replays a script and records its inputs.
///
/// An exhausted script behaves like a timeout: nothing ready.
#[derive(Debug, Default)]
pub(crate) struct ScriptedSelect {
    steps: VecDeque<Step>,
    pub calls: Vec<Call>,
}

impl ScriptedSelect {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            calls: Vec::new(),
        }
    }
}

fn keep_requested(words: &mut [Word], ready: &[usize]) -> usize {
    let mut out = vec![0 as Word; words.len()];
    let mut count = 0;
    for &fd in ready {
        let (word, mask) = (fd / BITS_PER_WORD, (1 as Word) << (fd % BITS_PER_WORD));
        if word < words.len() && words[word] & mask != 0 {
            out[word] |= mask;
            count += 1;
        }
    }
    words.copy_from_slice(&out);
    count
}

impl WaitPrimitive for ScriptedSelect {
    fn wait(
        &mut self,
        nfds: usize,
        read: &mut [Word],
        write: &mut [Word],
        timeout: libc::timeval,
    ) -> Result<usize, Errno> {
        self.calls.push(Call {
            nfds,
            read_in: read.to_vec(),
            write_in: write.to_vec(),
            timeout: (timeout.tv_sec as i64, timeout.tv_usec as i64),
        });

        match self.steps.pop_front() {
            Some(Step::Ready { read: r, write: w }) => {
                Ok(keep_requested(read, &r) + keep_requested(write, &w))
            }
            Some(Step::Fail(errno)) => Err(errno),
            Some(Step::Untouched) => {
                let count: usize = read.iter().chain(write.iter()).map(|w| w.count_ones() as usize).sum();
                Ok(count)
            }
            None => {
                read.fill(0);
                write.fill(0);
                Ok(0)
            }
        }
    }
}
