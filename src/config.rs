//! Run configuration shared by all commands.
//!
//! Values come from the global command-line options and are handed to each
//! pipeline entry point explicitly.

use log::LevelFilter;
use serde::{Deserialize, Serialize};

/// Verbosity used when neither `--verbose` nor `--quiet` is given.
pub const DEFAULT_VERBOSITY: u8 = 1;

/// Process-wide settings for a single invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of worker threads for commands that process independent files
    pub threads: usize,
    /// 0 is quiet, 1 is the default, higher values are more talkative
    pub verbosity: u8,
    /// Propagate errors with their full chain instead of a one-line message
    pub traceback: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            threads: rayon::current_num_threads(),
            verbosity: DEFAULT_VERBOSITY,
            traceback: false,
        }
    }
}

impl RunConfig {
    /// Combine the global flags into a config.
    ///
    /// `quiet` wins over any number of `verbose` flags. A thread count of zero
    /// means "use all available cores".
    pub fn from_flags(verbose: u8, quiet: bool, threads: Option<usize>, traceback: bool) -> Self {
        let defaults = RunConfig::default();
        let verbosity = if quiet {
            0
        } else {
            DEFAULT_VERBOSITY.saturating_add(verbose)
        };
        let threads = match threads {
            Some(0) | None => defaults.threads,
            Some(n) => n,
        };
        RunConfig {
            threads,
            verbosity,
            traceback,
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        match self.verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}
