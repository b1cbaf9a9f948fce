//! Turns a parsed [`Pipeline`] into a job: one process per command, all in one process
//! group, connected by pipes.
//!
//! Each stage is started with `fork` and `execve`. Everything the child needs is prepared
//! in the parent beforehand so the child only makes async-signal-safe calls.

use crate::control::JobControl;
use crate::env::Environment;
use crate::error::ShellError;
use crate::external::find_command_path;
use crate::job::{JobId, JobStatus};
use crate::pipeline::Pipeline;
use crate::reaper::{self, NotificationMask};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::SigSet;
use nix::unistd::{self, ForkResult, Pid};
use std::ffi::{CString, OsStr};
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::ptr;
use tracing::{debug, warn};

/// Dispositions a child gets back before running its program.
const RESET_SIGNALS: [libc::c_int; 7] = [
    libc::SIGCHLD,
    libc::SIGPIPE,
    libc::SIGTTOU,
    libc::SIGTTIN,
    libc::SIGTSTP,
    libc::SIGINT,
    libc::SIGQUIT,
];

/// Pipes between adjacent stages. Pipe `i` carries stage `i`'s stdout to stage `i + 1`.
struct Pipes {
    reads: Vec<Option<OwnedFd>>,
    writes: Vec<Option<OwnedFd>>,
}

impl Pipes {
    fn new(count: usize) -> nix::Result<Self> {
        let mut reads = Vec::with_capacity(count);
        let mut writes = Vec::with_capacity(count);
        for _ in 0..count {
            let (read, write) = unistd::pipe2(OFlag::O_CLOEXEC)?;
            reads.push(Some(read));
            writes.push(Some(write));
        }
        Ok(Self { reads, writes })
    }

    /// Read end feeding `stage`, if it has one.
    fn input_of(&self, stage: usize) -> Option<RawFd> {
        let index = stage.checked_sub(1)?;
        self.reads.get(index)?.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Write end `stage` writes into, if it has one.
    fn output_of(&self, stage: usize) -> Option<RawFd> {
        self.writes.get(stage)?.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Closes the parent's copies of the descriptors `stage` was given.
    fn close_after(&mut self, stage: usize) {
        if let Some(index) = stage.checked_sub(1) {
            if let Some(read) = self.reads.get_mut(index) {
                read.take();
            }
        }
        if let Some(write) = self.writes.get_mut(stage) {
            write.take();
        }
    }

    fn open_count(&self) -> usize {
        self.reads.iter().chain(&self.writes).flatten().count()
    }
}

/// NULL-terminated array of C strings, as `execve` expects.
struct CStringArray {
    strings: Vec<CString>,
    ptrs: Vec<*const libc::c_char>,
}

impl CStringArray {
    fn new(strings: Vec<CString>) -> Self {
        let ptrs = strings
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(ptr::null()))
            .collect();
        Self { strings, ptrs }
    }

    fn as_ptr(&self) -> *const *const libc::c_char {
        self.ptrs.as_ptr()
    }

    fn len(&self) -> usize {
        self.strings.len()
    }
}

/// Everything one stage's child process needs, resolved before forking.
struct StagePlan<'a> {
    name: String,
    program: CString,
    argv: CStringArray,
    envp: &'a CStringArray,
    stdin: Option<RawFd>,
    stdout: Option<RawFd>,
    merge_stderr: bool,
    exec_failure: Vec<u8>,
    empty_mask: SigSet,
    /// Redirection targets; held open until the child has been forked.
    _files: Vec<File>,
}

impl<'a> StagePlan<'a> {
    fn prepare(
        pipeline: &Pipeline,
        stage: usize,
        pipes: &Pipes,
        search_path: &OsStr,
        envp: &'a CStringArray,
    ) -> Result<Self, ShellError> {
        let command = &pipeline.commands[stage];
        let name = command.name().to_string();
        let program = find_command_path(search_path, Path::new(&name))
            .ok_or_else(|| ShellError::CommandNotFound(name.clone()))?;
        let program = CString::new(program.as_os_str().as_bytes())
            .map_err(|_| ShellError::InvalidArgument(name.clone()))?;
        let argv = command
            .argv
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ShellError::InvalidArgument(name.clone()))?;

        let mut files = Vec::new();
        let mut stdin = pipes.input_of(stage);
        if stage == 0 {
            if let Some(path) = &pipeline.input {
                let file = File::open(path).map_err(|source| ShellError::Redirect {
                    path: path.clone(),
                    source,
                })?;
                stdin = Some(file.as_raw_fd());
                files.push(file);
            }
        }
        let mut stdout = pipes.output_of(stage);
        if stage + 1 == pipeline.len() {
            if let Some(path) = &pipeline.output {
                let file = open_output(path, pipeline.append).map_err(|source| {
                    ShellError::Redirect {
                        path: path.clone(),
                        source,
                    }
                })?;
                stdout = Some(file.as_raw_fd());
                files.push(file);
            }
        }

        let exec_failure = format!("{name}: cannot execute\n").into_bytes();
        Ok(Self {
            name,
            program,
            argv: CStringArray::new(argv),
            envp,
            stdin,
            stdout,
            merge_stderr: command.merge_stderr,
            exec_failure,
            empty_mask: SigSet::empty(),
            _files: files,
        })
    }
}

fn open_output(path: &Path, append: bool) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .append(append)
        .truncate(!append)
        .mode(0o644)
        .open(path)
}

/// Child side of a stage: join the job's group, take the terminal if asked to, wire up
/// descriptors and run the program. Never returns.
///
/// # Safety
///
/// Must only be called in a freshly forked child. Only async-signal-safe functions are
/// used and nothing is allocated.
unsafe fn exec_child(plan: &StagePlan<'_>, pgid: Option<Pid>, tty: Option<RawFd>) -> ! {
    unsafe {
        libc::setpgid(0, pgid.map_or(0, Pid::as_raw));
        if let Some(tty) = tty {
            libc::tcsetpgrp(tty, libc::getpgrp());
        }
        for sig in RESET_SIGNALS {
            libc::signal(sig, libc::SIG_DFL);
        }
        libc::sigprocmask(libc::SIG_SETMASK, plan.empty_mask.as_ref(), ptr::null_mut());

        let wired = plan.stdin.is_none_or(|fd| libc::dup2(fd, libc::STDIN_FILENO) >= 0)
            && plan.stdout.is_none_or(|fd| libc::dup2(fd, libc::STDOUT_FILENO) >= 0)
            && (!plan.merge_stderr || libc::dup2(libc::STDOUT_FILENO, libc::STDERR_FILENO) >= 0);
        if wired {
            libc::execve(plan.program.as_ptr(), plan.argv.as_ptr(), plan.envp.as_ptr());
        }
        libc::write(
            libc::STDERR_FILENO,
            plan.exec_failure.as_ptr().cast(),
            plan.exec_failure.len(),
        );
        libc::_exit(127)
    }
}

/// Forks the process for one stage of job `id` and places it in the job's group.
fn spawn_stage(control: &JobControl, id: JobId, plan: &StagePlan<'_>) -> Result<Pid, ShellError> {
    let job = control.registry.lookup(id).ok_or(ShellError::NoSuchJob(id))?;
    let pgid = job.pgid();
    let foreground = job.status() == JobStatus::Foreground;
    let tty = if foreground { control.arbiter.tty_fd() } else { None };

    match unsafe { unistd::fork() } {
        Ok(ForkResult::Child) => unsafe { exec_child(plan, pgid, tty) },
        Ok(ForkResult::Parent { child }) => {
            let group = pgid.unwrap_or(child);
            // Also done by the child; whichever runs first wins. EACCES means the child
            // already called exec, ESRCH that it is already gone.
            match unistd::setpgid(child, group) {
                Ok(()) | Err(Errno::EACCES) | Err(Errno::ESRCH) => {}
                Err(err) => warn!(%child, %group, "setpgid failed: {err}"),
            }
            if foreground && pgid.is_none() {
                control.arbiter.give(group);
            }
            debug!(id, %child, %group, program = %plan.name, argc = plan.argv.len(), "stage spawned");
            Ok(child)
        }
        Err(source) => Err(ShellError::Fork {
            name: plan.name.clone(),
            source,
        }),
    }
}

/// Runs `pipeline` as a new job.
///
/// A foreground job is waited for; a background job is announced as `[id] pgid`. Returns
/// the job id while the job is still registered, `None` once it has been released.
pub fn execute(control: &mut JobControl, env: &Environment, pipeline: Pipeline) -> Option<JobId> {
    if pipeline.is_empty() {
        return None;
    }
    let _mask = NotificationMask::new();

    let mut pipes = match Pipes::new(pipeline.len() - 1) {
        Ok(pipes) => pipes,
        Err(source) => {
            control.complain(ShellError::Pipe(source));
            return None;
        }
    };
    let envp = CStringArray::new(env.to_envp());
    let search_path = env.get_var("PATH").unwrap_or_default();
    let stages = pipeline.clone();
    let id = control.registry.allocate(pipeline);

    for stage in 0..stages.len() {
        let spawned = StagePlan::prepare(
            &stages,
            stage,
            &pipes,
            OsStr::new(&search_path),
            &envp,
        )
        .and_then(|plan| spawn_stage(control, id, &plan));
        match spawned {
            Ok(pid) => control.registry.add_member(id, pid),
            Err(err) => control.complain(err),
        }
        pipes.close_after(stage);
    }
    debug_assert_eq!(pipes.open_count(), 0);
    drop(pipes);

    let status = control.registry.lookup(id).map(|job| (job.status(), job.pgid()));
    match status {
        Some((JobStatus::Foreground, _)) => {
            reaper::wait_for_job(control, id);
            control.arbiter.reclaim_for_shell();
        }
        Some((_, Some(pgid))) => control.say(format_args!("[{id}] {pgid}")),
        _ => {}
    }

    if control.release_if_finished(id) {
        None
    } else {
        Some(id)
    }
}
