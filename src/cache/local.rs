// src/cache/local.rs

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{decode_entry, encode_entry, CacheBackend, CacheEntry, CacheKey};
use crate::errors::CacheError;

/// Content-addressed cache directory with one CBOR file per key.
///
/// Entries are written to a temp file and renamed into place, so readers
/// never observe a partial entry.
#[derive(Debug, Clone)]
pub struct LocalCacheBackend {
    dir: PathBuf,
}

impl LocalCacheBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.bin"))
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("bin") {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Remove entries older than `max_age`. Unreadable entries are removed too.
    pub fn prune(&self, max_age: Duration) -> Result<PruneStats, CacheError> {
        info!(max_age_secs = max_age.as_secs(), "pruning cache");
        let mut stats = PruneStats::default();
        // An age too large to represent expires nothing.
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));

        for path in self.entry_files()? {
            stats.total += 1;
            let key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(CacheKey::from);
            let expired = match (key, fs::read(&path)) {
                (Some(key), Ok(bytes)) => match decode_entry(&key, &bytes) {
                    Ok(Some(entry)) => cutoff.is_some_and(|c| entry.metadata.created_at < c),
                    Ok(None) | Err(_) => true,
                },
                _ => true,
            };
            if expired && fs::remove_file(&path).is_ok() {
                stats.removed += 1;
            } else {
                stats.kept += 1;
            }
        }

        info!(total = stats.total, removed = stats.removed, kept = stats.kept, "cache prune complete");
        Ok(stats)
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();
        for path in self.entry_files()? {
            stats.entries += 1;
            if let Ok(meta) = fs::metadata(&path) {
                stats.total_size += meta.len();
            }
        }
        Ok(stats)
    }
}

impl CacheBackend for LocalCacheBackend {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(key = %key, "local cache miss");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        match decode_entry(key, &bytes) {
            Ok(entry) => Ok(entry),
            Err(err) => {
                if let Err(rm) = fs::remove_file(&path) {
                    warn!(key = %key, error = %rm, "failed to remove corrupt cache entry");
                }
                Err(err)
            }
        }
    }

    fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        if path.exists() {
            debug!(key = %key, "cache entry already present");
            return Ok(());
        }
        fs::create_dir_all(&self.dir)?;
        let bytes = encode_entry(entry)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;

        debug!(key = %key, bytes = bytes.len(), "stored local cache entry");
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => {
                debug!(key = %key, "evicted local cache entry");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Statistics from a prune operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    pub total: usize,
    pub removed: usize,
    pub kept: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    /// Total size in bytes.
    pub total_size: u64,
}

impl CacheStats {
    /// Format total size in human-readable form.
    pub fn formatted_size(&self) -> String {
        const KB: f64 = 1024.0;
        let size = self.total_size as f64;
        if size < KB {
            format!("{} B", self.total_size)
        } else if size < KB * KB {
            format!("{:.1} KB", size / KB)
        } else if size < KB * KB * KB {
            format!("{:.1} MB", size / (KB * KB))
        } else {
            format!("{:.1} GB", size / (KB * KB * KB))
        }
    }
}
