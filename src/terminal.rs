//! Ownership of the controlling terminal.
//!
//! The low-level get/set calls live behind [`TerminalDriver`]; the [`Arbiter`] decides who
//! gets the terminal and when, and remembers the shell's own group and mode so it can
//! always take the terminal back.

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::termios::{self, SetArg, Termios};
use nix::unistd::{self, Pid};
use std::io::IsTerminal;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use tracing::{debug, warn};

/// Terminal attributes captured by [`TerminalDriver::save_mode`].
#[derive(Clone, Debug)]
pub struct TerminalMode(Termios);

/// Primitive terminal operations the shell relies on.
pub trait TerminalDriver {
    /// Descriptor referring to the controlling terminal.
    fn controlling_fd(&self) -> RawFd;

    /// Process group currently in the terminal's foreground.
    fn foreground_group(&self) -> nix::Result<Pid>;

    /// Moves `pgid` into the terminal's foreground.
    fn set_foreground_group(&self, pgid: Pid) -> nix::Result<()>;

    fn save_mode(&self) -> nix::Result<TerminalMode>;

    fn restore_mode(&self, mode: &TerminalMode) -> nix::Result<()>;
}

/// [`TerminalDriver`] over the terminal the shell was started on.
pub struct TtyDriver {
    fd: OwnedFd,
}

impl TtyDriver {
    /// Returns a driver for stdin if it is a terminal.
    ///
    /// The descriptor is duplicated close-on-exec so spawned programs never inherit it.
    pub fn from_stdin() -> Option<Self> {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            return None;
        }
        match stdin.as_fd().try_clone_to_owned() {
            Ok(fd) => Some(Self { fd }),
            Err(err) => {
                warn!("cannot duplicate terminal descriptor: {err}");
                None
            }
        }
    }
}

impl TerminalDriver for TtyDriver {
    fn controlling_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn foreground_group(&self) -> nix::Result<Pid> {
        unistd::tcgetpgrp(&self.fd)
    }

    fn set_foreground_group(&self, pgid: Pid) -> nix::Result<()> {
        unistd::tcsetpgrp(&self.fd, pgid)
    }

    fn save_mode(&self) -> nix::Result<TerminalMode> {
        termios::tcgetattr(&self.fd).map(TerminalMode)
    }

    fn restore_mode(&self, mode: &TerminalMode) -> nix::Result<()> {
        termios::tcsetattr(&self.fd, SetArg::TCSADRAIN, &mode.0)
    }
}

/// Decides which process group owns the terminal.
///
/// A detached arbiter (no terminal) accepts every request and does nothing, which is what
/// a shell reading a script or a pipe needs.
pub struct Arbiter {
    driver: Option<Box<dyn TerminalDriver>>,
    shell_pgid: Pid,
    shell_mode: Option<TerminalMode>,
}

impl Arbiter {
    /// Arbiter for an interactive shell. Records the caller's process group and the
    /// terminal's current mode as the shell's own.
    pub fn new(driver: Box<dyn TerminalDriver>) -> Self {
        Self::with_shell_group(driver, unistd::getpgrp())
    }

    pub fn with_shell_group(driver: Box<dyn TerminalDriver>, shell_pgid: Pid) -> Self {
        let shell_mode = driver.save_mode().ok();
        Self {
            driver: Some(driver),
            shell_pgid,
            shell_mode,
        }
    }

    pub fn detached() -> Self {
        Self {
            driver: None,
            shell_pgid: unistd::getpgrp(),
            shell_mode: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.driver.is_some()
    }

    /// Terminal descriptor a freshly forked foreground child should claim.
    pub fn tty_fd(&self) -> Option<RawFd> {
        self.driver.as_ref().map(|d| d.controlling_fd())
    }

    /// Current foreground process group, if there is a terminal.
    pub fn owner(&self) -> Option<Pid> {
        self.driver.as_ref()?.foreground_group().ok()
    }

    /// Hands the terminal to `pgid`.
    pub fn give(&self, pgid: Pid) {
        let Some(driver) = &self.driver else {
            return;
        };
        debug!(%pgid, "giving terminal");
        if let Err(err) = driver.set_foreground_group(pgid) {
            warn!(%pgid, "tcsetpgrp failed: {err}");
        }
    }

    /// Restores `mode` (when given) and then hands the terminal to `pgid`.
    pub fn give_with_mode(&self, pgid: Pid, mode: Option<&TerminalMode>) {
        if let Some(mode) = mode {
            self.restore_mode(mode);
        }
        self.give(pgid);
    }

    /// Takes the terminal back for the shell and restores the shell's own mode.
    pub fn reclaim_for_shell(&self) {
        self.give(self.shell_pgid);
        if let Some(mode) = &self.shell_mode {
            self.restore_mode(mode);
        }
    }

    pub fn save_mode(&self) -> Option<TerminalMode> {
        match self.driver.as_ref()?.save_mode() {
            Ok(mode) => Some(mode),
            Err(err) => {
                debug!("cannot save terminal mode: {err}");
                None
            }
        }
    }

    pub fn restore_mode(&self, mode: &TerminalMode) {
        let Some(driver) = &self.driver else {
            return;
        };
        if let Err(err) = driver.restore_mode(mode) {
            warn!("cannot restore terminal mode: {err}");
        }
    }
}

/// Signals that would stop the shell when it touches the terminal from the background.
pub(crate) const JOB_CONTROL_SIGNALS: [Signal; 3] =
    [Signal::SIGTTOU, Signal::SIGTTIN, Signal::SIGTSTP];

/// Makes the calling shell the owner of `driver`'s terminal, in its own process group.
///
/// If the shell was started in the background it stops itself until it is brought to the
/// foreground. Afterwards the job-control signals are ignored so the shell can move the
/// terminal between groups without being suspended.
pub fn claim_terminal(driver: &dyn TerminalDriver) -> nix::Result<Pid> {
    loop {
        let shell_pgid = unistd::getpgrp();
        if driver.foreground_group()? == shell_pgid {
            break;
        }
        signal::killpg(shell_pgid, Signal::SIGTTIN)?;
    }

    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    for sig in JOB_CONTROL_SIGNALS {
        unsafe { signal::sigaction(sig, &ignore)? };
    }

    let shell_pid = unistd::getpid();
    if unistd::getpgrp() != shell_pid {
        // EPERM for a session leader, which already leads its group.
        if let Err(err) = unistd::setpgid(shell_pid, shell_pid) {
            debug!("setpgid on shell failed: {err}");
        }
    }
    let shell_pgid = unistd::getpgrp();
    driver.set_foreground_group(shell_pgid)?;
    debug!(%shell_pgid, "terminal claimed");
    Ok(shell_pgid)
}
