//! Job control for an interactive shell.
//!
//! Pipelines typed at the prompt become jobs: every command of a pipeline runs in one
//! process group, the terminal is handed to whichever job is in the foreground, and
//! stopped or background jobs can be moved around with `fg`, `bg`, `kill` and `stop`.
//!
//! The main entry point is [`Interpreter`]. [`JobControl`] and [`launcher::execute`]
//! can also be driven directly, which is how the integration tests exercise real
//! processes without a terminal.

mod builtin;
pub mod command;
pub mod config;
pub mod control;
pub mod env;
pub mod error;
mod external;
pub mod history;
mod interpreter;
pub mod job;
pub mod launcher;
pub mod lexer;
pub mod parser;
pub mod pipeline;
pub mod reaper;
pub mod registry;
pub mod terminal;

pub use config::Config;
pub use control::JobControl;
pub use error::ShellError;
pub use interpreter::{Interpreter, Shell};
pub use job::{Job, JobId, JobStatus};
pub use registry::Registry;
