//! evmux select backend end-to-end smoke test
//!
//! Drives `SelectBackend` over real pipes through a minimal loop:
//!   Part A — Lifecycle: create_backend, tag, fudge, empty capacity
//!   Part B — Readiness: writable end, readable after write, both at once
//!   Part C — Timeout and interrupt: empty wait, SIGALRM mid-wait
//!   Part D — Errors: closed descriptor sweep, capacity ceiling
//!
//! Run: ./target/release/select-smoke
//! (EVMUX_LOG_LEVEL=trace shows every poll)

use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use evmux_core::{Backend, BackendError, BackendFlags, BackendKind, Errno, EventMask, LoopHooks};
use evmux_select::{create_backend, SelectConfig};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        self.total += 1;
        if ok {
            self.passed += 1;
            println!("  [{:2}] {:<52} PASS", self.total, name);
        } else {
            self.failed += 1;
            println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
        }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

// ── Minimal owning loop ──

/// What one poll reported.
#[derive(Default)]
struct Collected {
    events: Vec<(RawFd, EventMask)>,
    bad_descriptor: usize,
    out_of_memory: usize,
    system_errors: Vec<Errno>,
}

impl LoopHooks for Collected {
    fn dispatch(&mut self, fd: RawFd, events: EventMask) {
        self.events.push((fd, events));
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
}

/// Watcher table plus backend; the loop side of the contract.
struct MiniLoop {
    backend: Box<dyn Backend>,
    watched: Vec<(RawFd, EventMask)>,
}

impl MiniLoop {
    fn new(backend: Box<dyn Backend>) -> Self {
        Self { backend, watched: Vec::new() }
    }

    fn current(&self, fd: RawFd) -> EventMask {
        self.watched
            .iter()
            .find(|(f, _)| *f == fd)
            .map(|(_, m)| *m)
            .unwrap_or_default()
    }

    fn watch(&mut self, fd: RawFd, events: EventMask) -> Result<(), BackendError> {
        let old = self.current(fd);
        self.backend.modify(fd, old, events)?;
        self.watched.retain(|(f, _)| *f != fd);
        if !events.is_empty() {
            self.watched.push((fd, events));
        }
        Ok(())
    }

    /// One iteration: wait, then drop watchers on closed descriptors.
    fn run_once(&mut self, timeout: f64) -> Collected {
        let mut out = Collected::default();
        self.backend.poll(&mut out, timeout + self.backend.fudge());
        if out.bad_descriptor > 0 {
            self.sweep_bad();
        }
        out
    }

    fn sweep_bad(&mut self) {
        let bad: Vec<RawFd> = self
            .watched
            .iter()
            .map(|(fd, _)| *fd)
            .filter(|fd| Errno::result(unsafe { libc::fcntl(*fd, libc::F_GETFD) }).is_err())
            .collect();
        for fd in bad {
            let _ = self.watch(fd, EventMask::empty());
        }
    }
}

impl Drop for MiniLoop {
    fn drop(&mut self) {
        self.backend.destroy();
    }
}

/// Register through the loop, recording the outcome as a check.
fn watch_checked(t: &mut TestRunner, ev: &mut MiniLoop, name: &str, fd: RawFd, events: EventMask) {
    let res = ev.watch(fd, events);
    t.check(name, res.is_ok(), &format!("{:?}", res));
}

fn pipe() -> (RawFd, RawFd) {
    let mut fds = [0; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe: {}", Errno::last());
    (fds[0], fds[1])
}

fn write_byte(fd: RawFd) {
    let b = [0x2au8];
    unsafe {
        libc::write(fd, b.as_ptr() as *const libc::c_void, 1);
    }
}

fn read_byte(fd: RawFd) {
    let mut b = [0u8];
    unsafe {
        libc::read(fd, b.as_mut_ptr() as *mut libc::c_void, 1);
    }
}

fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

extern "C" fn on_alarm(_: libc::c_int) {}

fn main() {
    let mut t = TestRunner::new();
    let config = SelectConfig::from_env();
    config.print();

    // ── Part A ──
    t.section("Part A — Lifecycle");

    let backend = match create_backend(BackendFlags::SELECT, config.clone()) {
        Ok(b) => b,
        Err(e) => {
            println!("  create_backend failed: {}", e);
            std::process::exit(1);
        }
    };
    t.check("tag is select", backend.kind() == BackendKind::Select, backend.name());
    t.check(
        "fudge declared",
        backend.fudge() > 0.0 && backend.fudge() < 1.0,
        &format!("{}", backend.fudge()),
    );
    let no_epoll = create_backend(BackendFlags::EPOLL, config.clone());
    t.check(
        "epoll-only flags refused",
        matches!(no_epoll, Err(BackendError::NoBackend(_))),
        "expected NoBackend",
    );

    let mut ev = MiniLoop::new(backend);

    // ── Part B ──
    t.section("Part B — Readiness");

    let (rfd, wfd) = pipe();
    watch_checked(&mut t, &mut ev, "watch write end", wfd, EventMask::WRITE);
    let out = ev.run_once(0.0);
    t.check(
        "empty pipe: write end writable",
        out.events == vec![(wfd, EventMask::WRITE)],
        &format!("{:?}", out.events),
    );

    watch_checked(&mut t, &mut ev, "watch read end", rfd, EventMask::READ);
    let out = ev.run_once(0.0);
    t.check(
        "empty pipe: read end not readable",
        !out.events.iter().any(|(fd, _)| *fd == rfd),
        &format!("{:?}", out.events),
    );

    write_byte(wfd);
    let out = ev.run_once(0.0);
    let mut expected = vec![(rfd, EventMask::READ), (wfd, EventMask::WRITE)];
    expected.sort_by_key(|(fd, _)| *fd);
    t.check("after write: both reported", out.events == expected, &format!("{:?}", out.events));

    let (sa, sb) = {
        let mut fds = [0; 2];
        let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(rc, 0, "socketpair: {}", Errno::last());
        (fds[0], fds[1])
    };
    write_byte(sb);
    watch_checked(&mut t, &mut ev, "watch socket both ways", sa, EventMask::READ | EventMask::WRITE);
    let out = ev.run_once(0.0);
    let sa_events = out.events.iter().find(|(fd, _)| *fd == sa).map(|(_, m)| *m);
    t.check(
        "socket: read+write in one dispatch",
        sa_events == Some(EventMask::READ | EventMask::WRITE),
        &format!("{:?}", sa_events),
    );
    watch_checked(&mut t, &mut ev, "unwatch socket", sa, EventMask::empty());
    close(sa);
    close(sb);

    // ── Part C ──
    t.section("Part C — Timeout and interrupt");

    read_byte(rfd);
    watch_checked(&mut t, &mut ev, "unwatch write end", wfd, EventMask::empty());
    let start = Instant::now();
    let out = ev.run_once(0.05);
    let elapsed = start.elapsed();
    t.check("timeout: nothing dispatched", out.events.is_empty(), &format!("{:?}", out.events));
    t.check(
        "timeout: waited",
        elapsed >= Duration::from_millis(40),
        &format!("{:?}", elapsed),
    );

    let action = SigAction::new(SigHandler::Handler(on_alarm), SaFlags::empty(), SigSet::empty());
    let installed = unsafe { sigaction(Signal::SIGALRM, &action) };
    if installed.is_ok() {
        unsafe {
            libc::alarm(1);
        }
        let start = Instant::now();
        let out = ev.run_once(5.0);
        let elapsed = start.elapsed();
        t.check(
            "SIGALRM: early return",
            elapsed < Duration::from_secs(4),
            &format!("{:?}", elapsed),
        );
        t.check(
            "SIGALRM: no callbacks",
            out.events.is_empty()
                && out.bad_descriptor == 0
                && out.out_of_memory == 0
                && out.system_errors.is_empty(),
            "interrupted wait reported something",
        );
    } else {
        t.check("SIGALRM handler installed", false, "sigaction failed");
    }

    // ── Part D ──
    t.section("Part D — Errors");

    close(rfd);
    let out = ev.run_once(0.0);
    t.check(
        "closed fd: bad descriptor once",
        out.bad_descriptor == 1 && out.events.is_empty(),
        &format!("bad={} events={:?}", out.bad_descriptor, out.events),
    );
    t.check("closed fd: swept from loop", ev.current(rfd).is_empty(), "still watched");
    let out = ev.run_once(0.0);
    t.check("after sweep: clean poll", out.bad_descriptor == 0, "still failing");

    let limit = config.max_descriptors as RawFd;
    let res = ev.watch(limit, EventMask::READ);
    t.check(
        "fd at ceiling rejected",
        matches!(res, Err(BackendError::CapacityExceeded { .. })),
        &format!("{:?}", res),
    );
    let res = ev.watch(-3, EventMask::READ);
    t.check(
        "negative fd rejected",
        res == Err(BackendError::InvalidDescriptor(-3)),
        &format!("{:?}", res),
    );

    close(wfd);
    drop(ev);

    t.summary();
    if t.failed > 0 {
        std::process::exit(1);
    }
}
