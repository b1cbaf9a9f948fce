//! Child status notifications.
//!
//! The SIGCHLD handler only reaps and records raw `(pid, status)` pairs in a fixed ring.
//! Everything that touches the registry happens in [`drain`] and [`wait_for_job`], which
//! run on the main thread with SIGCHLD blocked by a [`NotificationMask`].

use crate::control::JobControl;
use crate::job::{Job, JobId, JobStatus};
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::ffi::CStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, error, warn};

const QUEUE_CAPACITY: usize = 256;

/// Single-producer single-consumer ring of raw wait results.
///
/// The signal handler is the only producer and the masked main thread the only consumer,
/// so the two never run at the same time on one thread.
pub(crate) struct EventQueue {
    slots: [AtomicU64; QUEUE_CAPACITY],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl EventQueue {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [const { AtomicU64::new(0) }; QUEUE_CAPACITY],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) >= QUEUE_CAPACITY
    }

    /// Records one event. Returns `false` when the ring is full.
    pub(crate) fn push(&self, pid: libc::pid_t, status: libc::c_int) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= QUEUE_CAPACITY {
            return false;
        }
        let packed = (u64::from(pid as u32) << 32) | u64::from(status as u32);
        self.slots[tail % QUEUE_CAPACITY].store(packed, Ordering::Relaxed);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    pub(crate) fn pop(&self) -> Option<(libc::pid_t, libc::c_int)> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let packed = self.slots[head % QUEUE_CAPACITY].load(Ordering::Relaxed);
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(((packed >> 32) as u32 as libc::pid_t, packed as u32 as libc::c_int))
    }
}

static EVENTS: EventQueue = EventQueue::new();

extern "C" fn on_sigchld(_signo: libc::c_int) {
    let saved_errno = Errno::last_raw();
    // A full ring leaves children unreaped; the next drain sweep collects them.
    while !EVENTS.is_full() {
        let mut status: libc::c_int = 0;
        let pid = unsafe {
            libc::waitpid(
                -1,
                &mut status,
                libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED,
            )
        };
        if pid <= 0 {
            break;
        }
        EVENTS.push(pid, status);
    }
    Errno::set_raw(saved_errno);
}

/// Installs the SIGCHLD handler for the lifetime of the process.
pub fn install_handler() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_sigchld),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe { signal::sigaction(Signal::SIGCHLD, &action) }?;
    debug!("SIGCHLD handler installed");
    Ok(())
}

fn sigchld_set() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGCHLD);
    set
}

/// Blocks SIGCHLD for the current thread until dropped.
///
/// Guards nest: only the outermost one unblocks.
#[must_use = "notifications are unmasked again as soon as the guard is dropped"]
pub struct NotificationMask {
    previous: SigSet,
}

impl NotificationMask {
    pub fn new() -> Self {
        let mut previous = SigSet::empty();
        if let Err(err) =
            signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&sigchld_set()), Some(&mut previous))
        {
            warn!("cannot block SIGCHLD: {err}");
        }
        Self { previous }
    }
}

impl Default for NotificationMask {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NotificationMask {
    fn drop(&mut self) {
        if self.previous.contains(Signal::SIGCHLD) {
            return;
        }
        if let Err(err) = signal::pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&sigchld_set()), None)
        {
            warn!("cannot unblock SIGCHLD: {err}");
        }
    }
}

/// Whether SIGCHLD is currently blocked on this thread.
pub fn is_masked() -> bool {
    SigSet::thread_get_mask()
        .map(|mask| mask.contains(Signal::SIGCHLD))
        .unwrap_or(false)
}

/// Human-readable description of `sig`, as the C library renders it (`Terminated`).
pub fn describe_signal(sig: Signal) -> String {
    let text = unsafe { libc::strsignal(sig as libc::c_int) };
    if text.is_null() {
        return sig.as_str().to_string();
    }
    unsafe { CStr::from_ptr(text) }
        .to_string_lossy()
        .into_owned()
}

/// Applies one child status change to the job owning the child.
pub(crate) fn translate(control: &mut JobControl, status: WaitStatus) {
    match status {
        WaitStatus::Exited(pid, code) => {
            debug!(%pid, code, "member exited");
            if control.registry.member_exited(pid).is_none() {
                warn!(%pid, "exit reported for unknown process");
            }
        }
        WaitStatus::Signaled(pid, sig, _) => {
            debug!(%pid, ?sig, "member killed");
            let Some(id) = control.registry.member_exited(pid) else {
                warn!(%pid, "termination reported for unknown process");
                return;
            };
            if let Some(job) = control.registry.lookup_mut(id) {
                job.set_status(JobStatus::Background);
            }
            control.say(describe_signal(sig));
        }
        WaitStatus::Stopped(pid, sig) => {
            let Some(job) = control.registry.find_owner_mut(pid) else {
                warn!(%pid, "stop reported for unknown process");
                return;
            };
            if job.status == JobStatus::Stopped {
                return;
            }
            debug!(%pid, ?sig, id = job.id, "job stopped");
            job.set_status(JobStatus::Stopped);
            job.saved_mode = control.arbiter.save_mode();
            let line = job.to_string();
            control.arbiter.reclaim_for_shell();
            control.say("");
            control.say(line);
        }
        WaitStatus::Continued(pid) => {
            let Some(job) = control.registry.find_owner_mut(pid) else {
                warn!(%pid, "continue reported for unknown process");
                return;
            };
            if job.status.is_suspended() {
                debug!(%pid, id = job.id, "job continued");
                job.set_status(JobStatus::Background);
            }
        }
        other => debug!(?other, "ignoring wait status"),
    }
}

/// Processes every pending child status change without blocking.
///
/// Must be called with notifications masked.
pub fn drain(control: &mut JobControl) {
    debug_assert!(is_masked());
    while let Some((pid, raw)) = EVENTS.pop() {
        match WaitStatus::from_raw(Pid::from_raw(pid), raw) {
            Ok(status) => translate(control, status),
            Err(err) => warn!(pid, raw, "undecodable wait status: {err}"),
        }
    }
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    loop {
        match wait::waitpid(Pid::from_raw(-1), Some(flags)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
            Ok(status) => translate(control, status),
            Err(Errno::EINTR) => continue,
            Err(err) => {
                warn!("waitpid failed: {err}");
                break;
            }
        }
    }
}

/// Blocks until job `id` has no live members or has left the foreground.
///
/// Must be called with notifications masked.
pub fn wait_for_job(control: &mut JobControl, id: JobId) {
    drain(control);
    while control
        .registry
        .lookup(id)
        .is_some_and(Job::is_foreground_alive)
    {
        match wait::waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WUNTRACED)) {
            Ok(status) => translate(control, status),
            Err(Errno::EINTR) => continue,
            Err(err) => {
                error!(id, "waiting for job failed: {err}");
                break;
            }
        }
    }
}
