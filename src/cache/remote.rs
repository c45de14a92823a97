// src/cache/remote.rs

use std::fmt::Debug;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{decode_entry, encode_entry, CacheBackend, CacheEntry, CacheKey};
use crate::errors::CacheError;

/// Key to blob transport supplied by the embedding build tool.
pub trait RemoteTransport: Send + Sync + Debug {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn store(&self, key: &str, bytes: &[u8]) -> Result<()>;
    /// Drop the blob for `key`; a missing blob is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Cache backend over a [`RemoteTransport`]. Transport errors surface as
/// [`CacheError::Unavailable`].
#[derive(Debug)]
pub struct RemoteCacheBackend<T> {
    transport: T,
}

impl<T: RemoteTransport> RemoteCacheBackend<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: RemoteTransport> CacheBackend for RemoteCacheBackend<T> {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let bytes = self
            .transport
            .load(key.as_str())
            .map_err(CacheError::Unavailable)?;
        match bytes {
            Some(bytes) => decode_entry(key, &bytes),
            None => {
                debug!(key = %key, "remote cache miss");
                Ok(None)
            }
        }
    }

    fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError> {
        let bytes = encode_entry(entry)?;
        self.transport
            .store(key.as_str(), &bytes)
            .map_err(CacheError::Unavailable)
    }

    fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.transport
            .remove(key.as_str())
            .map_err(CacheError::Unavailable)
    }
}

/// Transport over a shared directory, e.g. a network mount.
#[derive(Debug, Clone)]
pub struct DirectoryTransport {
    dir: PathBuf,
}

impl DirectoryTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.bin"))
    }
}

impl RemoteTransport for DirectoryTransport {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading remote blob {:?}", path)),
        }
    }

    fn store(&self, key: &str, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating remote cache dir {:?}", self.dir))?;
        let path = self.blob_path(key);
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("creating temp file in {:?}", self.dir))?;
        tmp.write_all(bytes)?;
        tmp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("publishing remote blob {:?}", path))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.blob_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing remote blob {:?}", path)),
        }
    }
}
