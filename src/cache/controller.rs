// src/cache/controller.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{debug, info, warn};

use super::{CacheBackend, CacheEntry, CacheKey};
use crate::errors::CacheError;

/// Result of [`BuildCache::store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// This call wrote the entry to at least one backend.
    Stored,
    /// Another writer already handled this key during the run.
    AlreadyStored,
    /// No backend accepted the entry (or pushing is disabled).
    NotStored,
}

/// Where a [`CacheHit`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitSource {
    Local,
    Remote,
}

/// An entry returned by [`BuildCache::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    pub entry: CacheEntry,
    pub source: HitSource,
}

/// Fail-open cache layer used by the engine.
///
/// Lookups try the local backend first, then the remote one. A remote hit is
/// copied into the local backend once its restored outputs verify; a hit
/// that fails verification is evicted. Every error is logged and treated as a
/// miss. After its first error the remote backend is disabled for the rest
/// of the run.
#[derive(Debug, Default)]
pub struct BuildCache {
    local: Option<Arc<dyn CacheBackend>>,
    remote: Option<Arc<dyn CacheBackend>>,
    push_local: bool,
    push_remote: bool,
    remote_disabled: AtomicBool,
    writers: Mutex<HashMap<CacheKey, Arc<OnceLock<StoreOutcome>>>>,
}

impl BuildCache {
    /// A cache with no backends; every lookup misses.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(local: Option<Arc<dyn CacheBackend>>, remote: Option<Arc<dyn CacheBackend>>) -> Self {
        Self {
            push_local: local.is_some(),
            push_remote: remote.is_some(),
            local,
            remote,
            ..Self::default()
        }
    }

    pub fn with_push(mut self, local: bool, remote: bool) -> Self {
        self.push_local = local;
        self.push_remote = remote;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.local.is_some() || self.remote.is_some()
    }

    pub fn remote_disabled(&self) -> bool {
        self.remote_disabled.load(Ordering::SeqCst)
    }

    fn active_remote(&self) -> Option<&Arc<dyn CacheBackend>> {
        if self.remote_disabled() {
            None
        } else {
            self.remote.as_ref()
        }
    }

    fn disable_remote(&self, err: &CacheError) {
        if !self.remote_disabled.swap(true, Ordering::SeqCst) {
            warn!(error = %err, "remote cache failed; disabling it for the rest of the run");
        }
    }

    /// Look up an entry. Never fails.
    ///
    /// The hit is not trusted yet: callers restore it, then report the
    /// verdict through [`accept`](Self::accept) or [`reject`](Self::reject).
    pub fn load(&self, key: &CacheKey) -> Option<CacheHit> {
        if let Some(local) = &self.local {
            match local.get(key) {
                Ok(Some(entry)) => {
                    debug!(key = %key, "local cache hit");
                    return Some(CacheHit {
                        entry,
                        source: HitSource::Local,
                    });
                }
                Ok(None) => {}
                Err(err) => warn!(key = %key, error = %err, "local cache lookup failed; treating as miss"),
            }
        }

        let remote = self.active_remote()?;
        match remote.get(key) {
            Ok(Some(entry)) => {
                info!(key = %key, "remote cache hit");
                Some(CacheHit {
                    entry,
                    source: HitSource::Remote,
                })
            }
            Ok(None) => None,
            Err(err @ CacheError::Corrupt { .. }) => {
                warn!(key = %key, error = %err, "corrupt remote cache entry; treating as miss");
                None
            }
            Err(err) => {
                self.disable_remote(&err);
                None
            }
        }
    }

    /// The hit restored and verified. A remote hit is copied into the local
    /// backend.
    pub fn accept(&self, key: &CacheKey, hit: &CacheHit) {
        if hit.source != HitSource::Remote {
            return;
        }
        if let Some(local) = &self.local {
            if let Err(err) = local.put(key, &hit.entry) {
                warn!(key = %key, error = %err, "failed to copy remote entry into local cache");
            }
        }
    }

    /// The hit did not verify. Evict it from the backend that served it so
    /// the next store can replace it.
    pub fn reject(&self, key: &CacheKey, hit: &CacheHit) {
        match hit.source {
            HitSource::Local => {
                if let Some(local) = &self.local {
                    if let Err(err) = local.remove(key) {
                        warn!(key = %key, error = %err, "failed to evict local cache entry");
                    }
                }
            }
            HitSource::Remote => {
                if let Some(remote) = self.active_remote() {
                    if let Err(err) = remote.remove(key) {
                        self.disable_remote(&err);
                    }
                }
            }
        }
        // Let a later store in this run write the replacement.
        self.writers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        info!(key = %key, source = ?hit.source, "evicted cache entry that failed verification");
    }

    /// Store an entry, best effort.
    ///
    /// At most one writer per key runs within this process; concurrent and
    /// later writers for the same key observe the first writer's outcome.
    pub fn store(&self, key: &CacheKey, entry: &CacheEntry) -> StoreOutcome {
        let cell = {
            let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
            writers.entry(key.clone()).or_default().clone()
        };

        let mut wrote = false;
        let outcome = *cell.get_or_init(|| {
            wrote = true;
            self.store_to_backends(key, entry)
        });

        if wrote {
            outcome
        } else {
            debug!(key = %key, "cache entry handled by another writer");
            StoreOutcome::AlreadyStored
        }
    }

    fn store_to_backends(&self, key: &CacheKey, entry: &CacheEntry) -> StoreOutcome {
        let mut stored = false;

        if self.push_local {
            if let Some(local) = &self.local {
                match local.put(key, entry) {
                    Ok(()) => stored = true,
                    Err(err) => warn!(key = %key, error = %err, "failed to store local cache entry"),
                }
            }
        }

        if self.push_remote {
            if let Some(remote) = self.active_remote() {
                match remote.put(key, entry) {
                    Ok(()) => stored = true,
                    Err(err) => self.disable_remote(&err),
                }
            }
        }

        if stored {
            StoreOutcome::Stored
        } else {
            StoreOutcome::NotStored
        }
    }
}
