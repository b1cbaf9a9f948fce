use crate::command::{CommandFactory, ExecutableCommand, ExitCode};
use crate::interpreter::{Factory, Shell};
use crate::job::JobId;
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process, with access to the shell's jobs, history and environment.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "fg" or "jobs".
    fn name() -> &'static str;

    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, shell: &mut Shell) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, shell: &mut Shell) -> Result<ExitCode> {
        match <T as BuiltinCommand>::execute(*self, shell) {
            Ok(x) => Ok(x),
            Err(e) => {
                shell.jobs.complain(format_args!("{}: {e}", T::name()));
                Ok(1)
            }
        }
    }
}

/// Usage text or argument error produced while parsing a builtin's arguments.
struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, shell: &mut Shell) -> Result<ExitCode> {
        let output = self.output.trim_end();
        if self.is_error {
            shell.jobs.complain(output);
            Ok(1)
        } else {
            shell.jobs.say(output);
            Ok(0)
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

#[derive(FromArgs)]
/// Resume a job in the foreground and wait for it.
pub struct Fg {
    #[argh(positional)]
    /// job number as shown by `jobs`.
    pub job: JobId,
}

impl BuiltinCommand for Fg {
    fn name() -> &'static str {
        "fg"
    }

    fn execute(self, shell: &mut Shell) -> Result<ExitCode> {
        shell.jobs.fg(self.job)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Resume a stopped job in the background.
pub struct Bg {
    #[argh(positional)]
    /// job number as shown by `jobs`.
    pub job: JobId,
}

impl BuiltinCommand for Bg {
    fn name() -> &'static str {
        "bg"
    }

    fn execute(self, shell: &mut Shell) -> Result<ExitCode> {
        shell.jobs.bg(self.job)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Send SIGTERM to every process of a job.
pub struct Kill {
    #[argh(positional)]
    /// job number as shown by `jobs`.
    pub job: JobId,
}

impl BuiltinCommand for Kill {
    fn name() -> &'static str {
        "kill"
    }

    fn execute(self, shell: &mut Shell) -> Result<ExitCode> {
        shell.jobs.kill(self.job)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Suspend every process of a job.
pub struct Stop {
    #[argh(positional)]
    /// job number as shown by `jobs`.
    pub job: JobId,
}

impl BuiltinCommand for Stop {
    fn name() -> &'static str {
        "stop"
    }

    fn execute(self, shell: &mut Shell) -> Result<ExitCode> {
        shell.jobs.stop(self.job)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// List running and stopped jobs.
pub struct Jobs {}

impl BuiltinCommand for Jobs {
    fn name() -> &'static str {
        "jobs"
    }

    fn execute(self, shell: &mut Shell) -> Result<ExitCode> {
        shell.jobs.jobs();
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Exit shell process
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored; the shell always exits with status 0.
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _shell: &mut Shell) -> Result<ExitCode> {
        std::process::exit(0)
    }
}

#[derive(FromArgs)]
/// Print the lines entered in this session.
pub struct HistoryCmd {}

impl BuiltinCommand for HistoryCmd {
    fn name() -> &'static str {
        "history"
    }

    fn execute(self, shell: &mut Shell) -> Result<ExitCode> {
        let lines: Vec<String> = shell
            .history
            .numbered()
            .map(|(n, line)| format!("{n}: {line}"))
            .collect();
        for line in lines {
            shell.jobs.say(line);
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print the host name and the current directory.
pub struct Info {}

impl BuiltinCommand for Info {
    fn name() -> &'static str {
        "info"
    }

    fn execute(self, shell: &mut Shell) -> Result<ExitCode> {
        let hostname = nix::unistd::gethostname().context("can't read host name")?;
        shell
            .jobs
            .say(format_args!("Hostname: {}", hostname.to_string_lossy()));
        shell.jobs.say(format_args!(
            "Current Directory: {}",
            shell.env.current_dir.display()
        ));
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::testing::{captured_control, Captured};
    use crate::env::Environment;
    use crate::history::History;
    use crate::pipeline::{Command, Pipeline};
    use pretty_assertions::assert_eq;

    fn shell() -> (Shell, Captured) {
        let (jobs, _term, out) = captured_control();
        let shell = Shell {
            env: Environment::new(),
            history: History::default(),
            jobs,
        };
        (shell, out)
    }

    fn run<T: BuiltinCommand + 'static>(shell: &mut Shell, args: &[&str]) -> ExitCode {
        let factory = Factory::<T>::default();
        let cmd = factory
            .try_create(T::name(), args)
            .expect("factory recognizes its own name");
        cmd.execute(shell).unwrap()
    }

    #[test]
    fn factory_ignores_other_names() {
        assert!(Factory::<Fg>::default().try_create("bg", &["1"]).is_none());
    }

    #[test]
    fn unknown_job_is_reported_with_command_name() {
        let (mut shell, out) = shell();
        assert_eq!(run::<Fg>(&mut shell, &["3"]), 1);
        assert_eq!(run::<Kill>(&mut shell, &["4"]), 1);
        assert_eq!(out.text(), "fg: job 3 not found\nkill: job 4 not found\n");
    }

    #[test]
    fn bg_on_running_job_is_rejected() {
        let (mut shell, out) = shell();
        let mut pipeline = Pipeline::new(vec![Command::new(["sleep", "5"])]);
        pipeline.background = true;
        shell.jobs.registry.allocate(pipeline);
        assert_eq!(run::<Bg>(&mut shell, &["1"]), 1);
        assert_eq!(out.text(), "bg: job 1 is not stopped\n");
    }

    #[test]
    fn missing_job_argument_is_usage_error() {
        let (mut shell, out) = shell();
        assert_eq!(run::<Stop>(&mut shell, &[]), 1);
        assert!(out.text().contains("job"), "got {:?}", out.text());
    }

    #[test]
    fn non_numeric_job_is_usage_error() {
        let (mut shell, _out) = shell();
        assert_eq!(run::<Fg>(&mut shell, &["one"]), 1);
    }

    #[test]
    fn help_exits_successfully() {
        let (mut shell, out) = shell();
        assert_eq!(run::<Jobs>(&mut shell, &["--help"]), 0);
        assert!(out.text().starts_with("Usage: jobs"), "got {:?}", out.text());
    }

    #[test]
    fn jobs_prints_listing() {
        let (mut shell, out) = shell();
        let mut pipeline = Pipeline::new(vec![
            Command::new(["sleep", "5"]),
            Command::new(["cat"]),
        ]);
        pipeline.background = true;
        shell.jobs.registry.allocate(pipeline);
        assert_eq!(run::<Jobs>(&mut shell, &[]), 0);
        assert_eq!(out.text(), "[1]   Running         (sleep 5 | cat)\n");
    }

    #[test]
    fn history_prints_numbered_lines() {
        let (mut shell, out) = shell();
        shell.history.record("sleep 5 &");
        shell.history.record("history");
        assert_eq!(run::<HistoryCmd>(&mut shell, &[]), 0);
        assert_eq!(out.text(), "1: sleep 5 &\n2: history\n");
    }

    #[test]
    fn info_prints_host_and_directory() {
        let (mut shell, out) = shell();
        shell.env.current_dir = "/tmp/somewhere".into();
        assert_eq!(run::<Info>(&mut shell, &[]), 0);
        let text = out.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Hostname: "));
        assert_eq!(lines[1], "Current Directory: /tmp/somewhere");
    }
}
