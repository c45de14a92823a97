// src/engine/overlap.rs

//! Ownership of the files under a node's tree outputs.
//!
//! A file found under a tree output before execution is foreign unless the
//! node's last recorded execution left it there with the same content.
//! Foreign files are kept through cleanup, never claimed as owned, and
//! disable caching for the node: a cache entry would capture them.

use std::collections::BTreeMap;

use crate::fingerprint::{Digest, TreeContents};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputOwnership {
    /// Foreign files and their content before execution.
    foreign: TreeContents,
}

impl OutputOwnership {
    /// Compare what is on disk now with what the last execution produced.
    /// No previous execution means every existing file is foreign.
    pub fn detect(before: &TreeContents, previous: Option<&TreeContents>) -> Self {
        let empty = BTreeMap::new();
        let mut foreign = TreeContents::new();
        for (property, files) in before {
            let owned = previous.and_then(|p| p.get(property)).unwrap_or(&empty);
            let theirs: BTreeMap<String, Digest> = files
                .iter()
                .filter(|(rel, digest)| owned.get(*rel) != Some(*digest))
                .map(|(rel, digest)| (rel.clone(), digest.clone()))
                .collect();
            if !theirs.is_empty() {
                foreign.insert(property.clone(), theirs);
            }
        }
        Self { foreign }
    }

    pub fn has_overlap(&self) -> bool {
        !self.foreign.is_empty()
    }

    /// Files that must survive cleanup.
    pub fn foreign(&self) -> &TreeContents {
        &self.foreign
    }

    /// Foreign files as `property/relative path`, sorted.
    pub fn describe(&self) -> Vec<String> {
        self.foreign
            .iter()
            .flat_map(|(property, files)| files.keys().map(move |rel| format!("{property}/{rel}")))
            .collect()
    }

    /// The part of `after` the node produced: everything except foreign
    /// files it left untouched.
    pub fn owned(&self, after: TreeContents) -> TreeContents {
        after
            .into_iter()
            .map(|(property, files)| {
                let theirs = self.foreign.get(&property);
                let mine = files
                    .into_iter()
                    .filter(|(rel, digest)| theirs.and_then(|t| t.get(rel)) != Some(digest))
                    .collect();
                (property, mine)
            })
            .collect()
    }
}
