// src/fingerprint/cache.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tracing::debug;

use super::hash::{compute_file_hash, Digest};
use crate::fs::FileSystem;

/// Run-scoped memo of file content digests.
///
/// Shared by every worker of a run. Entries under a node's output locations
/// must be invalidated once that node writes or restores them.
///
/// A digest computed while an invalidation ran is returned to its caller but
/// not memoized, since the file may have changed under the hasher.
#[derive(Debug, Default)]
pub struct FileHashCache {
    hashes: Mutex<HashMap<PathBuf, Digest>>,
    generation: AtomicU64,
}

impl FileHashCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Digest>> {
        self.hashes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the digest for a file, computing and caching it if necessary.
    pub fn get_or_compute(&self, fs: &dyn FileSystem, path: &Path) -> Result<Digest> {
        if let Some(digest) = self.lock().get(path) {
            return Ok(digest.clone());
        }

        debug!("hash cache miss: computing digest for {:?}", path);
        // Hash outside the lock; two workers racing on the same path compute
        // the same digest.
        let generation = self.generation();
        let digest = compute_file_hash(fs, path)?;
        let mut hashes = self.lock();
        if self.generation() == generation {
            hashes.insert(path.to_path_buf(), digest.clone());
        } else {
            debug!("hash cache invalidated while hashing {:?}; not memoizing", path);
        }
        Ok(digest)
    }

    /// Drop every cached digest at or below `location`.
    pub fn invalidate_under(&self, location: &Path) {
        let mut hashes = self.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        let before = hashes.len();
        hashes.retain(|path, _| !path.starts_with(location));
        let removed = before - hashes.len();
        if removed > 0 {
            debug!(removed, "invalidated hash cache under {:?}", location);
        }
    }

    /// Number of invalidations so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
