use crate::builtin::{Bg, Exit, Fg, HistoryCmd, Info, Jobs, Kill, Stop};
use crate::command::CommandFactory;
use crate::config::Config;
use crate::control::JobControl;
use crate::env::Environment;
use crate::history::History;
use crate::launcher;
use crate::parser;
use crate::pipeline::Pipeline;
use crate::reaper;
use crate::registry::Registry;
use crate::terminal::{self, Arbiter, TtyDriver};
use anyhow::Context;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io;
use tracing::debug;

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports the built-ins defined in this crate.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// State built-ins operate on.
pub struct Shell {
    pub env: Environment,
    pub history: History,
    pub jobs: JobControl,
}

fn builtins() -> Vec<Box<dyn CommandFactory>> {
    vec![
        Box::new(Factory::<Fg>::default()),
        Box::new(Factory::<Bg>::default()),
        Box::new(Factory::<Kill>::default()),
        Box::new(Factory::<Stop>::default()),
        Box::new(Factory::<Jobs>::default()),
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<HistoryCmd>::default()),
        Box::new(Factory::<Info>::default()),
    ]
}

/// The read-eval loop: built-ins run in-process, everything else becomes a job.
pub struct Interpreter {
    shell: Shell,
    commands: Vec<Box<dyn CommandFactory>>,
    interactive: bool,
}

impl Interpreter {
    /// Sets up a shell on the current process.
    ///
    /// When stdin is a terminal the shell moves into its own process group and takes the
    /// terminal; otherwise job control runs without one.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let arbiter = match TtyDriver::from_stdin() {
            Some(driver) => {
                terminal::claim_terminal(&driver).context("can't take control of the terminal")?;
                Arbiter::new(Box::new(driver))
            }
            None => Arbiter::detached(),
        };
        reaper::install_handler().context("can't install SIGCHLD handler")?;
        let jobs = JobControl::new(Registry::with_capacity(config.max_jobs), arbiter);
        Ok(Self::with_control(jobs, History::with_limit(config.history_size)))
    }

    /// Interpreter over existing job control, with the built-in set of commands.
    pub fn with_control(jobs: JobControl, history: History) -> Self {
        let interactive = jobs.arbiter().is_attached();
        Self {
            shell: Shell {
                env: Environment::new(),
                history,
                jobs,
            },
            commands: builtins(),
            interactive,
        }
    }

    /// Records, parses and runs one input line.
    pub fn execute_line(&mut self, line: &str) {
        self.shell.history.record(line);
        let pipelines = match parser::parse_line(line) {
            Ok(pipelines) => pipelines,
            Err(err) => {
                self.shell.jobs.complain(format_args!("jobsh: {err}"));
                return;
            }
        };
        self.shell.jobs.sync();
        for pipeline in pipelines {
            self.dispatch(pipeline);
        }
    }

    fn dispatch(&mut self, pipeline: Pipeline) {
        if let Some(command) = pipeline.single_command() {
            let args: Vec<&str> = command.args().iter().map(String::as_str).collect();
            let builtin = self
                .commands
                .iter()
                .find_map(|factory| factory.try_create(command.name(), &args));
            if let Some(builtin) = builtin {
                debug!(builtin = command.name(), "running builtin");
                if let Err(err) = builtin.execute(&mut self.shell) {
                    self.shell.jobs.complain(format_args!("{}: {err}", command.name()));
                }
                return;
            }
        }
        launcher::execute(&mut self.shell.jobs, &self.shell.env, pipeline);
    }

    /// Reads lines until end of input.
    pub fn repl(&mut self) -> rustyline::Result<()> {
        let mut rl = DefaultEditor::new()?;
        let prompt = if self.interactive { "jobsh> " } else { "" };

        loop {
            self.shell.jobs.sync();
            match rl.readline(prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        if let Err(err) = rl.add_history_entry(line.as_str()) {
                            debug!("can't add editor history entry: {err}");
                        }
                    }
                    self.execute_line(&line);
                }
                // Ctrl-C discards the line being edited.
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(ReadlineError::Io(err)) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(ReadlineError::Errno(errno)) if errno as i32 == libc::EINTR => continue,
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }
}
