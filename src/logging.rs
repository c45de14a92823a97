// src/logging.rs

//! Logging setup for `cachedag` using `tracing` + `tracing-subscriber`.
//!
//! The CLI level applies to cachedag's own targets; dependencies stay at
//! `warn`. Resolution order:
//! 1. `--log-level` flag
//! 2. `CACHEDAG_LOG`, either a bare level ("debug") or a full filter
//!    directive ("warn,cachedag::cache=trace")
//! 3. `info`
//!
//! Logs go to STDERR; stdout carries only the build report.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

/// Environment variable consulted when no `--log-level` is given.
pub const LOG_ENV: &str = "CACHEDAG_LOG";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env_value = std::env::var(LOG_ENV).ok();
    let filter = build_filter(cli_level, env_value.as_deref());

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install logging subscriber: {e}"))?;

    Ok(())
}

/// Level for cachedag's own targets: flag, then a bare-level env value, then
/// `info`.
pub fn resolve_level(cli_level: Option<LogLevel>, env_value: Option<&str>) -> Level {
    match cli_level {
        Some(lvl) => lvl.into(),
        None => env_value.and_then(parse_level_str).unwrap_or(Level::INFO),
    }
}

/// Full filter. An env value that looks like a directive list is used as-is
/// unless the flag overrides it.
pub fn build_filter(cli_level: Option<LogLevel>, env_value: Option<&str>) -> EnvFilter {
    if cli_level.is_none() {
        if let Some(directives) = env_value.filter(|v| v.contains('=') || v.contains(',')) {
            if let Ok(filter) = EnvFilter::try_new(directives) {
                return filter;
            }
        }
    }
    let level = resolve_level(cli_level, env_value);
    EnvFilter::new(format!("warn,cachedag={}", level.as_str().to_ascii_lowercase()))
}

impl From<LogLevel> for Level {
    fn from(lvl: LogLevel) -> Self {
        match lvl {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_ascii_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
