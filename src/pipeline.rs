//! Structured description of what the user asked to run.
//!
//! A [`Pipeline`] is produced by the parser and, once the launcher accepts it, is owned
//! by the job created for it until that job is released.

use std::fmt;
use std::path::PathBuf;

/// One stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Program name followed by its arguments; never empty.
    pub argv: Vec<String>,
    /// When set, the stage's stderr goes wherever its stdout goes.
    pub merge_stderr: bool,
}

impl Command {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            merge_stderr: false,
        }
    }

    /// Name of the program to run (`argv[0]`).
    pub fn name(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    /// Arguments after the program name.
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }
}

/// Ordered commands connected by pipes, plus the redirections that apply to the
/// pipeline as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
    /// File read by the first stage instead of the shell's stdin.
    pub input: Option<PathBuf>,
    /// File written by the last stage instead of the shell's stdout.
    pub output: Option<PathBuf>,
    /// Open `output` for appending instead of truncating it.
    pub append: bool,
    /// Run without waiting and without giving it the terminal.
    pub background: bool,
}

impl Pipeline {
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            commands,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Returns the command if this pipeline is a single bare command, the only shape
    /// under which a built-in may run inside the shell process.
    pub fn single_command(&self) -> Option<&Command> {
        match self.commands.as_slice() {
            [cmd] => Some(cmd),
            _ => None,
        }
    }
}

/// Renders the command text the way job listings show it: `a -x | b | c`.
impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, cmd) in self.commands.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            f.write_str(&cmd.argv.join(" "))?;
        }
        Ok(())
    }
}
