//! Command-line options.

use crate::history::DEFAULT_HISTORY_SIZE;
use crate::registry::DEFAULT_CAPACITY;
use argh::FromArgs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the default log filter.
pub const LOG_ENV: &str = "JOBSH_LOG";

#[derive(FromArgs, Debug, Clone, PartialEq, Eq)]
/// An interactive shell with job control.
pub struct Config {
    /// size of the job number pool; job numbers range from 1 to max-jobs - 1.
    #[argh(option, default = "DEFAULT_CAPACITY")]
    pub max_jobs: usize,

    /// number of input lines kept for `history`.
    #[argh(option, default = "DEFAULT_HISTORY_SIZE")]
    pub history_size: usize,

    /// log filter, e.g. `debug` or `jobsh::reaper=trace`; overrides JOBSH_LOG.
    #[argh(option)]
    pub log: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_jobs: DEFAULT_CAPACITY,
            history_size: DEFAULT_HISTORY_SIZE,
            log: None,
        }
    }
}

impl Config {
    /// Filter for diagnostics: `--log`, else `JOBSH_LOG`, else warnings only.
    pub fn log_filter(&self) -> EnvFilter {
        let from_flag = self.log.as_deref().map(EnvFilter::try_new);
        match from_flag {
            Some(Ok(filter)) => filter,
            Some(Err(err)) => {
                eprintln!("jobsh: ignoring invalid log filter: {err}");
                EnvFilter::new("warn")
            }
            None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        }
    }

    /// Installs the global subscriber. Diagnostics go to stderr so they never mix with
    /// job output.
    pub fn init_logging(&self) {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(self.log_filter())
            .init();
    }
}
