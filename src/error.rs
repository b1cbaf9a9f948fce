//! Errors reported by job-control commands and the pipeline launcher.
//!
//! Every variant here is recoverable: it is printed for the user and the shell carries on.

use crate::job::JobId;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("job {0} not found")]
    NoSuchJob(JobId),

    #[error("job {0} is not stopped")]
    NotStopped(JobId),

    #[error("{0}: command not found")]
    CommandNotFound(String),

    #[error("{0}: argument contains a NUL byte")]
    InvalidArgument(String),

    #[error("{}: {source}", path.display())]
    Redirect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot create pipe: {0}")]
    Pipe(#[source] nix::Error),

    #[error("{name}: cannot fork: {source}")]
    Fork {
        name: String,
        #[source]
        source: nix::Error,
    },

    #[error("cannot signal job {id}: {source}")]
    Signal {
        id: JobId,
        #[source]
        source: nix::Error,
    },
}
