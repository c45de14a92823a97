// src/fingerprint/snapshot.rs

use std::collections::BTreeMap;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use super::hash::{file_property_digest, tree_property_digest, Digest};
use super::{Fingerprint, TreeContents};

/// Captured content of a task's output properties.
///
/// Stored inside cache entries and written back to disk on a cache hit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSnapshot {
    properties: BTreeMap<String, SnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotEntry {
    /// File bytes, or `None` when the output file did not exist.
    File(Option<Vec<u8>>),
    /// Relative `/`-separated path to file bytes.
    Tree(BTreeMap<String, Vec<u8>>),
    /// Non-location outputs only carry their digest.
    Value(Digest),
}

impl OutputSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, property: impl Into<String>, entry: SnapshotEntry) {
        self.properties.insert(property.into(), entry);
    }

    pub fn get(&self, property: &str) -> Option<&SnapshotEntry> {
        self.properties.get(property)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SnapshotEntry)> {
        self.properties.iter()
    }

    /// Check that every tree path stays inside its tree root.
    ///
    /// Paths must be relative, `/`-separated and free of empty, `.` and
    /// `..` segments. Entries read from a cache are untrusted.
    pub fn validate(&self) -> Result<(), String> {
        for (name, entry) in &self.properties {
            if let SnapshotEntry::Tree(files) = entry {
                if let Some(bad) = files.keys().find(|rel| !is_safe_relative(rel)) {
                    return Err(format!("tree output '{name}' holds unsafe path {bad:?}"));
                }
            }
        }
        Ok(())
    }

    /// Relative paths and content digests of the captured tree files.
    pub fn tree_contents(&self) -> TreeContents {
        self.properties
            .iter()
            .filter_map(|(name, entry)| match entry {
                SnapshotEntry::Tree(files) => Some((
                    name.clone(),
                    files
                        .iter()
                        .map(|(rel, bytes)| (rel.clone(), Digest::of_bytes(bytes)))
                        .collect(),
                )),
                _ => None,
            })
            .collect()
    }

    /// Total payload size in bytes.
    pub fn size(&self) -> usize {
        self.properties
            .values()
            .map(|entry| match entry {
                SnapshotEntry::File(Some(bytes)) => bytes.len(),
                SnapshotEntry::File(None) | SnapshotEntry::Value(_) => 0,
                SnapshotEntry::Tree(files) => files.values().map(Vec::len).sum(),
            })
            .sum()
    }

    /// Fingerprint of the captured content.
    ///
    /// Equal to what the fingerprinter computes for the same content on disk.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut fingerprint = Fingerprint::new();
        for (name, entry) in &self.properties {
            let digest = match entry {
                SnapshotEntry::File(bytes) => {
                    let content = bytes.as_deref().map(Digest::of_bytes);
                    file_property_digest(content.as_ref())
                }
                SnapshotEntry::Tree(files) => {
                    let digests: Vec<(&str, Digest)> = files
                        .iter()
                        .map(|(path, bytes)| (path.as_str(), Digest::of_bytes(bytes)))
                        .collect();
                    tree_property_digest(digests.iter().map(|(p, d)| (*p, d)))
                }
                SnapshotEntry::Value(digest) => digest.clone(),
            };
            fingerprint.insert(name.clone(), digest);
        }
        fingerprint
    }
}

/// True for a non-empty relative path whose `/`-separated segments are all
/// plain names on this platform.
pub fn is_safe_relative(rel: &str) -> bool {
    !rel.is_empty()
        && rel.split('/').all(|part| {
            let mut components = Path::new(part).components();
            matches!(
                (components.next(), components.next()),
                (Some(Component::Normal(name)), None) if name == part
            )
        })
}
