use crate::pipeline::Pipeline;
use crate::terminal::TerminalMode;
use nix::unistd::Pid;
use std::fmt;

/// Small positive number users refer to a job by.
pub type JobId = usize;

/// Scheduling state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Owns the terminal; the shell is waiting on it. At most one job is in this state.
    Foreground,
    /// Running without the terminal.
    Background,
    /// Suspended by a stop signal.
    Stopped,
    /// A background job suspended for wanting the terminal. Nothing moves a job here yet.
    NeedsTerminal,
}

impl JobStatus {
    /// Text shown by `jobs` and stop notifications.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Foreground => "Foreground",
            JobStatus::Background => "Running",
            JobStatus::Stopped => "Stopped",
            JobStatus::NeedsTerminal => "Stopped (tty)",
        }
    }

    /// Whether `jobs` lists a job in this state.
    pub fn is_listable(self) -> bool {
        matches!(
            self,
            JobStatus::Foreground | JobStatus::Background | JobStatus::Stopped
        )
    }

    /// Whether `bg` may resume a job in this state.
    pub fn is_suspended(self) -> bool {
        matches!(self, JobStatus::Stopped | JobStatus::NeedsTerminal)
    }
}

/// One pipeline invocation and the processes running it.
#[derive(Debug)]
pub struct Job {
    pub(crate) id: JobId,
    pub(crate) pipeline: Pipeline,
    pub(crate) pgid: Option<Pid>,
    pub(crate) members: Vec<Pid>,
    pub(crate) alive: usize,
    pub(crate) status: JobStatus,
    pub(crate) saved_mode: Option<TerminalMode>,
}

impl Job {
    pub(crate) fn new(id: JobId, pipeline: Pipeline) -> Self {
        let status = if pipeline.background {
            JobStatus::Background
        } else {
            JobStatus::Foreground
        };
        Self {
            id,
            pipeline,
            pgid: None,
            members: Vec::new(),
            alive: 0,
            status,
            saved_mode: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Process group shared by every member; the pid of the first member spawned.
    pub fn pgid(&self) -> Option<Pid> {
        self.pgid
    }

    /// Spawned members in pipeline order.
    pub fn members(&self) -> &[Pid] {
        &self.members
    }

    /// Members not yet reported as exited or killed.
    pub fn alive(&self) -> usize {
        self.alive
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
    }

    /// Terminal mode captured when the job was stopped.
    pub fn saved_mode(&self) -> Option<&TerminalMode> {
        self.saved_mode.as_ref()
    }

    /// The shell is blocked on this job.
    pub fn is_foreground_alive(&self) -> bool {
        self.status == JobStatus::Foreground && self.alive > 0
    }
}

/// Status line used by `jobs` and stop notifications:
/// `[1]   Stopped         (sleep 5)`.
impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]   {}         ({})",
            self.id,
            self.status.as_str(),
            self.pipeline
        )
    }
}
