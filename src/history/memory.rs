// src/history/memory.rs

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::info;

use super::{ExecutionRecord, HistoryStore};
use crate::errors::HistoryError;
use crate::types::TaskId;

/// Keeps records in memory only.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: RwLock<HashMap<TaskId, ExecutionRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn lookup(&self, task: &TaskId) -> Option<ExecutionRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task)
            .cloned()
    }

    fn record(&self, task: &TaskId, record: ExecutionRecord) -> Result<(), HistoryError> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.clone(), record);
        info!(task = %task, "stored execution record (memory)");
        Ok(())
    }

    fn remove(&self, task: &TaskId) -> Result<(), HistoryError> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task);
        Ok(())
    }

    fn prune(&self, active: &[TaskId]) -> Result<usize, HistoryError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let initial_len = records.len();
        records.retain(|task, _| active.contains(task));
        let removed = initial_len - records.len();
        if removed > 0 {
            info!(removed, "pruned stale execution records (memory)");
        }
        Ok(removed)
    }
}
