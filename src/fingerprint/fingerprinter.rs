// src/fingerprint/fingerprinter.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, trace};

use super::hash::{
    file_property_digest, normalize_relative, tree_property_digest, value_property_digest,
    value_set_property_digest, Digest,
};
use super::snapshot::{is_safe_relative, OutputSnapshot, SnapshotEntry};
use super::spec::{PropertyKind, PropertySpec, TreeFilter, TreeSpec};
use super::{FileHashCache, Fingerprint, TreeContents};
use crate::errors::FingerprintError;
use crate::fs::FileSystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Input,
    Output,
}

/// Computes fingerprints and snapshots for property specs.
///
/// Relative paths are resolved against `root`. File digests are memoized in
/// a [`FileHashCache`] for the lifetime of the fingerprinter.
#[derive(Debug)]
pub struct Fingerprinter {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    hashes: FileHashCache,
}

impl Fingerprinter {
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
            hashes: FileHashCache::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    pub fn hash_cache(&self) -> &FileHashCache {
        &self.hashes
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Fingerprint declared inputs. A missing or unreadable input file fails.
    pub fn fingerprint_inputs(&self, specs: &[PropertySpec]) -> Result<Fingerprint, FingerprintError> {
        self.fingerprint(specs, Side::Input)
    }

    /// Fingerprint declared outputs. A missing output file digests to the
    /// "absent" marker.
    pub fn fingerprint_outputs(&self, specs: &[PropertySpec]) -> Result<Fingerprint, FingerprintError> {
        self.fingerprint(specs, Side::Output)
    }

    fn fingerprint(&self, specs: &[PropertySpec], side: Side) -> Result<Fingerprint, FingerprintError> {
        let mut fingerprint = Fingerprint::new();
        for spec in specs {
            let digest = self.property_digest(spec, side)?;
            trace!(property = %spec.name, digest = %digest, "fingerprinted property");
            fingerprint.insert(spec.name.clone(), digest);
        }
        Ok(fingerprint)
    }

    fn property_digest(&self, spec: &PropertySpec, side: Side) -> Result<Digest, FingerprintError> {
        match &spec.kind {
            PropertyKind::File(path) => {
                let path = self.resolve(path);
                if side == Side::Output && !self.fs.exists(&path) {
                    return Ok(file_property_digest(None));
                }
                let content = self
                    .file_digest(&path)
                    .map_err(|source| unreadable(side, &spec.name, &path, source))?;
                Ok(file_property_digest(Some(&content)))
            }
            PropertyKind::Tree(tree) => {
                let root = self.resolve(&tree.root);
                let files = self.walk_tree(&spec.name, tree, side)?;
                let mut digests = Vec::with_capacity(files.len());
                for (rel, path) in files {
                    let digest = self
                        .hashes
                        .get_or_compute(self.fs.as_ref(), &path)
                        .map_err(|source| unreadable(side, &spec.name, &path, source))?;
                    digests.push((rel, digest));
                }
                debug!(property = %spec.name, files = digests.len(), "fingerprinted tree {:?}", root);
                Ok(tree_property_digest(digests.iter().map(|(r, d)| (r.as_str(), d))))
            }
            PropertyKind::Value(value) => {
                value_property_digest(value).map_err(|source| FingerprintError::Value {
                    property: spec.name.clone(),
                    source,
                })
            }
            PropertyKind::ValueSet(values) => {
                value_set_property_digest(values).map_err(|source| FingerprintError::Value {
                    property: spec.name.clone(),
                    source,
                })
            }
        }
    }

    fn file_digest(&self, path: &Path) -> Result<Digest> {
        if !self.fs.is_file(path) {
            return Err(anyhow!("not a regular file"));
        }
        self.hashes.get_or_compute(self.fs.as_ref(), path)
    }

    /// Files of a tree property as `(relative path, full path)`, sorted by
    /// relative path. A missing root is an empty tree. Links to directories
    /// below the root are not followed.
    fn walk_tree(
        &self,
        property: &str,
        tree: &TreeSpec,
        side: Side,
    ) -> Result<Vec<(String, PathBuf)>, FingerprintError> {
        let root = self.resolve(&tree.root);
        if !self.fs.is_dir(&root) {
            return Ok(Vec::new());
        }
        let filter = TreeFilter::compile(property, tree)?;

        let mut files = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(dir) = stack.pop() {
            let entries = self
                .fs
                .read_dir(&dir)
                .map_err(|source| unreadable(side, property, &dir, source))?;
            for entry in entries {
                if self.fs.is_dir(&entry) {
                    if self.fs.is_symlink(&entry) {
                        debug!(property, "not following directory link {:?}", entry);
                    } else {
                        stack.push(entry);
                    }
                } else if let Some(rel) = normalize_relative(&root, &entry) {
                    if filter.matches(&rel) {
                        files.push((rel, entry));
                    }
                }
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    /// Capture the current content of declared outputs.
    pub fn snapshot_outputs(&self, specs: &[PropertySpec]) -> Result<OutputSnapshot, FingerprintError> {
        let mut snapshot = OutputSnapshot::new();
        for spec in specs {
            let entry = match &spec.kind {
                PropertyKind::File(path) => {
                    let path = self.resolve(path);
                    if self.fs.exists(&path) {
                        let bytes = self
                            .fs
                            .read(&path)
                            .map_err(|source| unreadable(Side::Output, &spec.name, &path, source))?;
                        SnapshotEntry::File(Some(bytes))
                    } else {
                        SnapshotEntry::File(None)
                    }
                }
                PropertyKind::Tree(tree) => {
                    let mut files = BTreeMap::new();
                    for (rel, path) in self.walk_tree(&spec.name, tree, Side::Output)? {
                        let bytes = self
                            .fs
                            .read(&path)
                            .map_err(|source| unreadable(Side::Output, &spec.name, &path, source))?;
                        files.insert(rel, bytes);
                    }
                    SnapshotEntry::Tree(files)
                }
                PropertyKind::Value(_) | PropertyKind::ValueSet(_) => {
                    SnapshotEntry::Value(self.property_digest(spec, Side::Output)?)
                }
            };
            snapshot.insert(spec.name.clone(), entry);
        }
        Ok(snapshot)
    }

    /// Relative paths and digests of the files currently in each tree output.
    pub fn tree_contents(&self, specs: &[PropertySpec]) -> Result<TreeContents, FingerprintError> {
        let mut contents = TreeContents::new();
        for spec in specs {
            let PropertyKind::Tree(tree) = &spec.kind else {
                continue;
            };
            let mut files = BTreeMap::new();
            for (rel, path) in self.walk_tree(&spec.name, tree, Side::Output)? {
                let digest = self
                    .hashes
                    .get_or_compute(self.fs.as_ref(), &path)
                    .map_err(|source| unreadable(Side::Output, &spec.name, &path, source))?;
                files.insert(rel, digest);
            }
            contents.insert(spec.name.clone(), files);
        }
        Ok(contents)
    }

    /// Delete everything at the declared output locations.
    ///
    /// For filtered trees only the matching files are removed.
    pub fn clear_outputs(&self, specs: &[PropertySpec]) -> Result<()> {
        self.clear_outputs_keeping(specs, &TreeContents::new())
    }

    /// Like [`clear_outputs`](Self::clear_outputs), but the tree files listed
    /// in `keep` stay where they are.
    pub fn clear_outputs_keeping(&self, specs: &[PropertySpec], keep: &TreeContents) -> Result<()> {
        for spec in specs {
            let kept = keep.get(&spec.name).filter(|files| !files.is_empty());
            match &spec.kind {
                PropertyKind::File(path) => self.fs.remove_all(&self.resolve(path))?,
                PropertyKind::Tree(tree)
                    if kept.is_none() && tree.include.is_empty() && tree.exclude.is_empty() =>
                {
                    self.fs.remove_all(&self.resolve(&tree.root))?
                }
                PropertyKind::Tree(tree) => {
                    for (rel, path) in self.walk_tree(&spec.name, tree, Side::Output)? {
                        if !kept.is_some_and(|files| files.contains_key(&rel)) {
                            self.fs.remove_all(&path)?;
                        }
                    }
                }
                PropertyKind::Value(_) | PropertyKind::ValueSet(_) => {}
            }
        }
        self.invalidate_outputs(specs);
        Ok(())
    }

    /// Write a snapshot back to the declared output locations.
    ///
    /// Callers clear the outputs first so stale files do not survive.
    pub fn restore_outputs(&self, specs: &[PropertySpec], snapshot: &OutputSnapshot) -> Result<()> {
        for spec in specs {
            let Some(entry) = snapshot.get(&spec.name) else {
                continue;
            };
            match (&spec.kind, entry) {
                (PropertyKind::File(path), SnapshotEntry::File(Some(bytes))) => {
                    let path = self.resolve(path);
                    self.fs
                        .write(&path, bytes)
                        .with_context(|| format!("restoring output '{}'", spec.name))?;
                }
                (PropertyKind::File(_), SnapshotEntry::File(None)) => {}
                (PropertyKind::Tree(tree), SnapshotEntry::Tree(files)) => {
                    let root = self.resolve(&tree.root);
                    for (rel, bytes) in files {
                        if !is_safe_relative(rel) {
                            return Err(anyhow!(
                                "refusing to restore {rel:?} outside output '{}'",
                                spec.name
                            ));
                        }
                        let path = rel.split('/').fold(root.clone(), |acc, part| acc.join(part));
                        self.fs
                            .write(&path, bytes)
                            .with_context(|| format!("restoring output '{}'", spec.name))?;
                    }
                }
                (_, SnapshotEntry::Value(_)) => {}
                _ => {
                    return Err(anyhow!(
                        "snapshot entry for '{}' does not match its declared kind",
                        spec.name
                    ));
                }
            }
        }
        self.invalidate_outputs(specs);
        Ok(())
    }

    /// Forget memoized digests under the declared output locations.
    pub fn invalidate_outputs(&self, specs: &[PropertySpec]) {
        for spec in specs {
            match &spec.kind {
                PropertyKind::File(path) => self.hashes.invalidate_under(&self.resolve(path)),
                PropertyKind::Tree(tree) => self.hashes.invalidate_under(&self.resolve(&tree.root)),
                PropertyKind::Value(_) | PropertyKind::ValueSet(_) => {}
            }
        }
    }
}

fn unreadable(side: Side, property: &str, path: &Path, source: anyhow::Error) -> FingerprintError {
    match side {
        Side::Input => FingerprintError::InputUnreadable {
            property: property.to_string(),
            path: path.to_path_buf(),
            source,
        },
        Side::Output => FingerprintError::OutputUnreadable {
            property: property.to_string(),
            path: path.to_path_buf(),
            source,
        },
    }
}
