//! Job control commands: `fg`, `bg`, `kill`, `stop` and `jobs`.
//!
//! [`JobControl`] bundles everything these commands and the launcher share: the job
//! registry, the terminal arbiter, and the streams user-visible notices are written to.

use crate::error::ShellError;
use crate::job::{JobId, JobStatus};
use crate::reaper::{self, NotificationMask};
use crate::registry::Registry;
use crate::terminal::Arbiter;
use nix::sys::signal::{self, Signal};
use std::fmt::Display;
use std::io::{self, Write};
use tracing::{debug, warn};

pub struct JobControl {
    pub(crate) registry: Registry,
    pub(crate) arbiter: Arbiter,
    out: Box<dyn Write>,
    err: Box<dyn Write>,
}

impl JobControl {
    /// Job control writing notices to the process's stdout and stderr.
    pub fn new(registry: Registry, arbiter: Arbiter) -> Self {
        Self::with_streams(
            registry,
            arbiter,
            Box::new(io::stdout()),
            Box::new(io::stderr()),
        )
    }

    pub fn with_streams(
        registry: Registry,
        arbiter: Arbiter,
        out: Box<dyn Write>,
        err: Box<dyn Write>,
    ) -> Self {
        Self {
            registry,
            arbiter,
            out,
            err,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }

    /// Writes one line of regular output.
    pub fn say(&mut self, line: impl Display) {
        if let Err(err) = writeln!(self.out, "{line}").and_then(|()| self.out.flush()) {
            warn!("cannot write output: {err}");
        }
    }

    /// Writes one line to the error stream.
    pub fn complain(&mut self, line: impl Display) {
        if let Err(err) = writeln!(self.err, "{line}").and_then(|()| self.err.flush()) {
            warn!("cannot write diagnostics: {err}");
        }
    }

    /// Applies pending child notifications and forgets jobs that have finished.
    pub fn sync(&mut self) {
        let _mask = NotificationMask::new();
        reaper::drain(self);
        for id in self.registry.release_finished() {
            debug!(id, "finished job removed");
        }
    }

    /// Resumes job `id` in the foreground and waits for it.
    pub fn fg(&mut self, id: JobId) -> Result<(), ShellError> {
        let _mask = NotificationMask::new();
        let job = self
            .registry
            .lookup_mut(id)
            .ok_or(ShellError::NoSuchJob(id))?;
        job.set_status(JobStatus::Foreground);
        let pgid = job.pgid;
        let mode = job.saved_mode.take();
        let line = job.pipeline.to_string();
        self.say(line);

        if let Some(pgid) = pgid {
            self.arbiter.give_with_mode(pgid, mode.as_ref());
            if let Err(err) = signal::killpg(pgid, Signal::SIGCONT) {
                // The group may already be gone; its exit is still waiting to be reaped.
                warn!(id, %pgid, "cannot continue job: {err}");
            }
        }
        reaper::wait_for_job(self, id);
        self.arbiter.reclaim_for_shell();
        self.release_if_finished(id);
        Ok(())
    }

    /// Resumes a stopped job `id` in the background.
    pub fn bg(&mut self, id: JobId) -> Result<(), ShellError> {
        let _mask = NotificationMask::new();
        let job = self
            .registry
            .lookup_mut(id)
            .ok_or(ShellError::NoSuchJob(id))?;
        if !job.status.is_suspended() {
            return Err(ShellError::NotStopped(id));
        }
        job.set_status(JobStatus::Background);
        if let Some(pgid) = job.pgid {
            signal::killpg(pgid, Signal::SIGCONT).map_err(|source| ShellError::Signal { id, source })?;
            self.say(format_args!("[{id}] {pgid}"));
        }
        Ok(())
    }

    /// Sends SIGTERM to every member of job `id`.
    ///
    /// The job is removed later, when the reaper sees its members die.
    pub fn kill(&mut self, id: JobId) -> Result<(), ShellError> {
        self.signal_job(id, Signal::SIGTERM)?;
        self.arbiter.reclaim_for_shell();
        Ok(())
    }

    /// Sends SIGSTOP to every member of job `id`.
    pub fn stop(&mut self, id: JobId) -> Result<(), ShellError> {
        self.signal_job(id, Signal::SIGSTOP)
    }

    /// Prints the status line of every listable job.
    pub fn jobs(&mut self) {
        let lines: Vec<String> = self
            .registry
            .for_each_listable()
            .map(ToString::to_string)
            .collect();
        for line in lines {
            self.say(line);
        }
    }

    fn signal_job(&mut self, id: JobId, sig: Signal) -> Result<(), ShellError> {
        let _mask = NotificationMask::new();
        let job = self.registry.lookup(id).ok_or(ShellError::NoSuchJob(id))?;
        if let Some(pgid) = job.pgid {
            debug!(id, %pgid, ?sig, "signalling job");
            signal::killpg(pgid, sig).map_err(|source| ShellError::Signal { id, source })?;
        }
        Ok(())
    }

    pub(crate) fn release_if_finished(&mut self, id: JobId) -> bool {
        let finished = self.registry.lookup(id).is_some_and(|job| job.alive == 0);
        finished && self.registry.release(id)
    }
}
