#![allow(dead_code)]

pub use cachedag_test_utils::{actions, builders, fake_executor, init_tracing, transports, with_timeout};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cachedag::engine::{CacheOptions, Engine, EngineOptions, RunReport};
use cachedag::dag::FinalizedGraph;
use cachedag::history::FileHistoryStore;
use tempfile::TempDir;

/// A throwaway project directory with the default state layout.
pub struct Project {
    dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel)).unwrap()
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }

    pub fn remove(&self, rel: &str) {
        let path = self.path(rel);
        if path.is_dir() {
            std::fs::remove_dir_all(path).unwrap();
        } else {
            std::fs::remove_file(path).unwrap();
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.path(".cachedag")
    }

    /// History and local cache under `.cachedag`, four workers.
    pub fn options(&self) -> EngineOptions {
        EngineOptions::new(self.root()).workers(4)
    }

    /// Same project, but without any history so only the cache can help.
    pub fn options_without_history(&self, history_dir: &str) -> EngineOptions {
        self.options()
            .history(Arc::new(FileHistoryStore::new(self.path(history_dir))))
    }

    pub fn options_without_cache(&self) -> EngineOptions {
        self.options().cache(CacheOptions::disabled())
    }

    pub async fn run(&self, options: EngineOptions, graph: FinalizedGraph) -> RunReport {
        with_timeout(Engine::new(options).run(graph)).await.unwrap()
    }
}
