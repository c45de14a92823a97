// src/housekeeping.rs

//! State maintenance behind `--prune-cache`: expire old local cache entries
//! and forget the history of tasks that left the build file.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::cache::{CacheStats, LocalCacheBackend, PruneStats};
use crate::config::ConfigFile;
use crate::history::{FileHistoryStore, HistoryStore};
use crate::types::TaskId;

/// What a prune removed and what is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    /// `None` when the build file disables the cache.
    pub cache: Option<PruneStats>,
    pub remaining: Option<CacheStats>,
    pub history_removed: usize,
}

impl fmt::Display for PruneReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.cache, self.remaining) {
            (Some(pruned), Some(left)) => writeln!(
                f,
                "cache: removed {} of {} entries ({} kept, {} in use)",
                pruned.removed,
                pruned.total,
                pruned.kept,
                left.formatted_size()
            )?,
            _ => writeln!(f, "cache: disabled")?,
        }
        write!(f, "history: removed {} stale records", self.history_removed)
    }
}

/// `count` whole days.
pub fn days(count: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(24 * 60 * 60))
}

/// Prune the local cache and the history of a project rooted at `root`.
pub fn prune_state(cfg: &ConfigFile, root: &Path, max_age: Duration) -> Result<PruneReport> {
    let (cache, remaining) = match cfg.local_cache_dir(root) {
        Some(dir) => {
            let backend = LocalCacheBackend::new(dir);
            let pruned = backend.prune(max_age)?;
            (Some(pruned), Some(backend.stats()?))
        }
        None => (None, None),
    };

    let active: Vec<TaskId> = cfg.task.keys().map(|name| TaskId::from(name.as_str())).collect();
    let history_removed = FileHistoryStore::new(cfg.state_dir(root)).prune(&active)?;

    info!(history_removed, "state pruned");
    Ok(PruneReport {
        cache,
        remaining,
        history_removed,
    })
}
