// src/fingerprint/spec.rs

use std::path::PathBuf;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::errors::FingerprintError;

/// A named input or output property of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    pub name: String,
    pub kind: PropertyKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    /// A single regular file.
    File(PathBuf),
    /// A directory tree, optionally filtered by glob patterns.
    Tree(TreeSpec),
    /// An ordered value, digested over its canonical JSON form.
    Value(serde_json::Value),
    /// An unordered set of values.
    ValueSet(Vec<serde_json::Value>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TreeSpec {
    pub root: PathBuf,
    /// Patterns relative to `root`. Empty means "every file".
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl PropertySpec {
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::File(path.into()),
        }
    }

    pub fn tree(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Tree(TreeSpec {
                root: root.into(),
                ..TreeSpec::default()
            }),
        }
    }

    pub fn filtered_tree(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        include: Vec<String>,
        exclude: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Tree(TreeSpec {
                root: root.into(),
                include,
                exclude,
            }),
        }
    }

    pub fn value(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Value(value.into()),
        }
    }

    pub fn value_set(name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::ValueSet(values),
        }
    }

    /// Short tag identifying the property kind; part of cache keys.
    pub fn kind_tag(&self) -> &'static str {
        match self.kind {
            PropertyKind::File(_) => "file",
            PropertyKind::Tree(_) => "tree",
            PropertyKind::Value(_) => "value",
            PropertyKind::ValueSet(_) => "value-set",
        }
    }

    /// Whether this property lives on disk (and can be materialized).
    pub fn is_location(&self) -> bool {
        matches!(self.kind, PropertyKind::File(_) | PropertyKind::Tree(_))
    }
}

/// Compiled include/exclude filter for a tree property.
#[derive(Debug)]
pub struct TreeFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl TreeFilter {
    pub fn compile(property: &str, spec: &TreeSpec) -> Result<Self, FingerprintError> {
        Ok(Self {
            include: build_set(property, &spec.include)?,
            exclude: build_set(property, &spec.exclude)?,
        })
    }

    /// `rel` is a `/`-separated path relative to the tree root.
    pub fn matches(&self, rel: &str) -> bool {
        let included = self.include.as_ref().is_none_or(|set| set.is_match(rel));
        let excluded = self.exclude.as_ref().is_some_and(|set| set.is_match(rel));
        included && !excluded
    }
}

fn build_set(property: &str, patterns: &[String]) -> Result<Option<GlobSet>, FingerprintError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| FingerprintError::Pattern {
            property: property.to_string(),
            source,
        })?;
        builder.add(glob);
    }
    let set = builder.build().map_err(|source| FingerprintError::Pattern {
        property: property.to_string(),
        source,
    })?;
    Ok(Some(set))
}
