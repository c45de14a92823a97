// src/fingerprint/mod.rs

//! Content fingerprints of task inputs and outputs.
//!
//! A [`Fingerprint`] maps property names to BLAKE3 digests. Two fingerprints
//! are equal iff every property digest is equal.

use std::collections::BTreeMap;

use blake3::Hasher;
use serde::{Deserialize, Serialize};

pub mod cache;
pub mod fingerprinter;
pub mod hash;
pub mod snapshot;
pub mod spec;

pub use cache::FileHashCache;
pub use fingerprinter::Fingerprinter;
pub use hash::Digest;
pub use snapshot::{OutputSnapshot, SnapshotEntry};
pub use spec::{PropertyKind, PropertySpec, TreeSpec};

/// Per tree property, the relative path and content digest of every file.
pub type TreeContents = BTreeMap<String, BTreeMap<String, Digest>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(BTreeMap<String, Digest>);

impl Fingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, property: impl Into<String>, digest: Digest) {
        self.0.insert(property.into(), digest);
    }

    pub fn get(&self, property: &str) -> Option<&Digest> {
        self.0.get(property)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Digest)> {
        self.0.iter()
    }

    /// Single digest over the whole fingerprint, used in cache keys.
    pub fn digest(&self) -> Digest {
        let mut hasher = Hasher::new();
        for (name, digest) in &self.0 {
            hasher.update(&(name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            hasher.update(digest.as_str().as_bytes());
        }
        Digest::from_hasher(&hasher)
    }

    /// Names of properties whose digest differs, including properties present
    /// on only one side. Sorted by name.
    pub fn changed_properties(&self, other: &Fingerprint) -> Vec<String> {
        let mut changed: Vec<String> = self
            .0
            .iter()
            .filter(|(name, digest)| other.0.get(*name) != Some(*digest))
            .map(|(name, _)| name.clone())
            .collect();
        changed.extend(
            other
                .0
                .keys()
                .filter(|name| !self.0.contains_key(*name))
                .cloned(),
        );
        changed.sort();
        changed
    }
}
