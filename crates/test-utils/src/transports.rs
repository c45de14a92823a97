#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use cachedag::cache::RemoteTransport;

/// Remote transport backed by a shared in-memory map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    loads: Arc<AtomicUsize>,
    stores: Arc<AtomicUsize>,
    removes: Arc<AtomicUsize>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.blobs.lock().unwrap().keys().cloned().collect()
    }

    /// Overwrite a stored blob, e.g. to simulate corruption.
    pub fn put_raw(&self, key: &str, bytes: Vec<u8>) {
        self.blobs.lock().unwrap().insert(key.to_string(), bytes);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(key)
    }
}

impl RemoteTransport for InMemoryTransport {
    fn load(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.blobs.lock().unwrap().get(key).cloned())
    }

    fn store(&self, key: &str, bytes: &[u8]) -> anyhow::Result<()> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.blobs.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Remote transport whose every call fails, counting the attempts.
#[derive(Debug, Clone, Default)]
pub struct FailingTransport {
    calls: Arc<AtomicUsize>,
}

impl FailingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RemoteTransport for FailingTransport {
    fn load(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("connection refused while loading {key}")
    }

    fn store(&self, key: &str, _bytes: &[u8]) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("connection refused while storing {key}")
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("connection refused while removing {key}")
    }
}
