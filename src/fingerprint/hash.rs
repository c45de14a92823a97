// src/fingerprint/hash.rs

//! BLAKE3 digests for files, trees and values.
//!
//! Every property kind hashes under its own domain tag so that, for example,
//! an absent output file can never collide with a file of the same bytes.
//! The same functions back both on-disk fingerprinting and
//! [`OutputSnapshot::fingerprint`](super::OutputSnapshot::fingerprint).

use std::fmt;
use std::io::Read;
use std::path::Path;

use anyhow::Result;
use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::fs::FileSystem;

/// Hex-encoded BLAKE3 digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    pub fn from_hasher(hasher: &Hasher) -> Self {
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const FILE_TAG: &[u8] = b"cachedag/file\0";
const ABSENT_TAG: &[u8] = b"cachedag/absent\0";
const TREE_TAG: &[u8] = b"cachedag/tree\0";
const VALUE_TAG: &[u8] = b"cachedag/value\0";
const VALUE_SET_TAG: &[u8] = b"cachedag/value-set\0";

/// Hash the raw contents of a single file.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<Digest> {
    let mut hasher = Hasher::new();
    let mut file = fs.open_read(path)?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Digest::from_hasher(&hasher))
}

/// Digest of a `File` property. `None` means the file does not exist.
pub fn file_property_digest(content: Option<&Digest>) -> Digest {
    let mut hasher = Hasher::new();
    match content {
        Some(digest) => {
            hasher.update(FILE_TAG);
            hasher.update(digest.as_str().as_bytes());
        }
        None => {
            hasher.update(ABSENT_TAG);
        }
    }
    Digest::from_hasher(&hasher)
}

/// Digest of a `Tree` property.
///
/// `entries` are `(relative path, content digest)` pairs. Paths must use `/`
/// separators; the pairs are sorted here so listing order never matters.
pub fn tree_property_digest<'a, I>(entries: I) -> Digest
where
    I: IntoIterator<Item = (&'a str, &'a Digest)>,
{
    let mut entries: Vec<_> = entries.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Hasher::new();
    hasher.update(TREE_TAG);
    for (path, digest) in entries {
        hasher.update(&(path.len() as u64).to_le_bytes());
        hasher.update(path.as_bytes());
        hasher.update(digest.as_str().as_bytes());
    }
    Digest::from_hasher(&hasher)
}

/// Digest of a `Value` property over its canonical JSON form.
pub fn value_property_digest(value: &serde_json::Value) -> serde_json::Result<Digest> {
    let canonical = serde_json::to_string(value)?;
    let mut hasher = Hasher::new();
    hasher.update(VALUE_TAG);
    hasher.update(canonical.as_bytes());
    Ok(Digest::from_hasher(&hasher))
}

/// Digest of a `ValueSet` property. Element order is irrelevant.
pub fn value_set_property_digest(values: &[serde_json::Value]) -> serde_json::Result<Digest> {
    let mut canonical = values
        .iter()
        .map(serde_json::to_string)
        .collect::<serde_json::Result<Vec<_>>>()?;
    canonical.sort();
    canonical.dedup();

    let mut hasher = Hasher::new();
    hasher.update(VALUE_SET_TAG);
    for item in canonical {
        hasher.update(&(item.len() as u64).to_le_bytes());
        hasher.update(item.as_bytes());
    }
    Ok(Digest::from_hasher(&hasher))
}

/// Normalize a path relative to a tree root into a `/`-separated string.
pub fn normalize_relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
