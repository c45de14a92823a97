// src/cache/mod.rs

//! Content-addressed build cache.
//!
//! A [`CacheEntry`] holds the outputs a task produced for a given
//! [`CacheKey`]. Backends store entries as versioned CBOR blobs. The
//! [`BuildCache`] controller layers a local and an optional remote backend
//! and never lets a cache problem fail a build.

use std::fmt::{self, Debug};

use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::CacheError;
use crate::fingerprint::{Digest, Fingerprint, OutputSnapshot, PropertySpec};
use crate::types::TaskId;

pub mod controller;
pub mod local;
pub mod remote;

pub use controller::{BuildCache, CacheHit, HitSource, StoreOutcome};
pub use local::{CacheStats, LocalCacheBackend, PruneStats};
pub use remote::{DirectoryTransport, RemoteCacheBackend, RemoteTransport};

/// Bumped whenever the entry layout or the key derivation changes.
pub const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a task execution.
    ///
    /// Depends only on the action identity, the input fingerprint and the
    /// names and kinds of the declared outputs.
    pub fn derive(action_identity: &Digest, inputs: &Fingerprint, outputs: &[PropertySpec]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(&CACHE_FORMAT_VERSION.to_le_bytes());
        hasher.update(action_identity.as_str().as_bytes());
        hasher.update(inputs.digest().as_str().as_bytes());

        let mut declared: Vec<(&str, &str)> = outputs
            .iter()
            .map(|spec| (spec.name.as_str(), spec.kind_tag()))
            .collect();
        declared.sort();
        for (name, kind) in declared {
            hasher.update(&(name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            hasher.update(kind.as_bytes());
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub origin_task: TaskId,
    pub execution_ms: u64,
    pub created_at: DateTime<Utc>,
    pub format_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub outputs: OutputSnapshot,
    pub output_fingerprint: Fingerprint,
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        origin_task: TaskId,
        outputs: OutputSnapshot,
        output_fingerprint: Fingerprint,
        execution_ms: u64,
    ) -> Self {
        Self {
            key,
            outputs,
            output_fingerprint,
            metadata: CacheMetadata {
                origin_task,
                execution_ms,
                created_at: Utc::now(),
                format_version: CACHE_FORMAT_VERSION,
            },
        }
    }
}

/// A store of immutable cache entries.
pub trait CacheBackend: Send + Sync + Debug {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;
    fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError>;
    /// Evict the entry for `key`. Removing a missing entry is not an error.
    fn remove(&self, key: &CacheKey) -> Result<(), CacheError>;
}

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    version: u32,
    entry: &'a CacheEntry,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    version: u32,
    entry: ciborium::Value,
}

/// Encode an entry as a versioned CBOR blob.
pub fn encode_entry(entry: &CacheEntry) -> Result<Vec<u8>, CacheError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(
        &EnvelopeOut {
            version: CACHE_FORMAT_VERSION,
            entry,
        },
        &mut bytes,
    )
    .map_err(|e| CacheError::Encode {
        key: entry.key.clone(),
        reason: e.to_string(),
    })?;
    Ok(bytes)
}

/// Decode a blob stored under `key`.
///
/// An entry written with another format version reads as a miss. Anything
/// undecodable, an entry filed under the wrong key, or one whose tree paths
/// would escape their output root, is corrupt.
pub fn decode_entry(key: &CacheKey, bytes: &[u8]) -> Result<Option<CacheEntry>, CacheError> {
    let corrupt = |reason: String| CacheError::Corrupt {
        key: key.clone(),
        reason,
    };

    let envelope: EnvelopeIn = ciborium::from_reader(bytes).map_err(|e| corrupt(e.to_string()))?;
    if envelope.version != CACHE_FORMAT_VERSION {
        debug!(key = %key, version = envelope.version, "ignoring cache entry with unknown format version");
        return Ok(None);
    }
    let entry: CacheEntry = envelope
        .entry
        .deserialized()
        .map_err(|e| corrupt(e.to_string()))?;
    if &entry.key != key {
        return Err(corrupt(format!("entry is filed under a different key ({})", entry.key)));
    }
    entry.outputs.validate().map_err(corrupt)?;
    Ok(Some(entry))
}
