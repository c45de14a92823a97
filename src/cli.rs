// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::FailurePolicy;

/// Command-line arguments for `cachedag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cachedag",
    version,
    about = "Run a task graph incrementally, skipping up-to-date tasks and restoring outputs from a build cache.",
    long_about = None
)]
pub struct CliArgs {
    /// Tasks to run, together with their dependencies.
    ///
    /// If omitted, every task in the build file runs.
    #[arg(value_name = "TASK")]
    pub tasks: Vec<String>,

    /// Path to the build file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Cachedag.toml")]
    pub config: String,

    /// Maximum number of tasks running at once (overrides `[engine].workers`).
    #[arg(long, short = 'j', value_name = "N")]
    pub workers: Option<usize>,

    /// Cancel running tasks as soon as one task fails.
    #[arg(long, conflicts_with = "keep_going")]
    pub fail_fast: bool,

    /// Keep running every task that does not depend on a failed one.
    #[arg(long = "continue", id = "keep_going")]
    pub keep_going: bool,

    /// Neither read from nor write to any build cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Keep execution history in memory only, so every task is considered
    /// out of date (the cache still applies).
    #[arg(long)]
    pub no_history: bool,

    /// Remove local cache entries older than DAYS and the history of tasks
    /// no longer in the build file, then exit without running anything.
    #[arg(long, value_name = "DAYS", conflicts_with = "dry_run")]
    pub prune_cache: Option<u64>,

    /// Parse + validate, print the execution plan, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CACHEDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

impl CliArgs {
    /// Failure policy requested on the command line, if any.
    pub fn failure_policy(&self) -> Option<FailurePolicy> {
        if self.fail_fast {
            Some(FailurePolicy::FailFast)
        } else if self.keep_going {
            Some(FailurePolicy::Continue)
        } else {
            None
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
