// src/history/file.rs

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{ExecutionRecord, HistoryStore};
use crate::errors::HistoryError;
use crate::sync::KeyedLocks;
use crate::types::TaskId;

/// Bumped whenever the record layout changes. Records with any other
/// version read as "no history".
pub const HISTORY_FORMAT_VERSION: u32 = 1;

/// Directory (below the state dir) holding one JSON file per task.
pub const HISTORY_DIR: &str = "history";

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    version: u32,
    record: &'a ExecutionRecord,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    version: u32,
    record: serde_json::Value,
}

/// Stores one record per task under `<state_dir>/history/<blake3(task)>.json`.
///
/// Writes go through a temp file in the same directory and are renamed into
/// place, so a crash mid-write leaves the previous record intact.
#[derive(Debug)]
pub struct FileHistoryStore {
    dir: PathBuf,
    writers: KeyedLocks<TaskId>,
}

impl FileHistoryStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: state_dir.as_ref().join(HISTORY_DIR),
            writers: KeyedLocks::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, task: &TaskId) -> PathBuf {
        let name = blake3::hash(task.as_str().as_bytes()).to_hex();
        self.dir.join(format!("{name}.json"))
    }

    fn read_record(&self, path: &Path) -> Result<Option<ExecutionRecord>, HistoryError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let envelope: EnvelopeIn =
            serde_json::from_slice(&bytes).map_err(|source| HistoryError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;
        if envelope.version != HISTORY_FORMAT_VERSION {
            return Err(HistoryError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: envelope.version,
            });
        }
        let record = serde_json::from_value(envelope.record).map_err(|source| {
            HistoryError::Corrupt {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(Some(record))
    }

    fn discard(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(error = %err, "failed to remove unusable history record {:?}", path);
            }
        }
    }
}

impl HistoryStore for FileHistoryStore {
    fn lookup(&self, task: &TaskId) -> Option<ExecutionRecord> {
        let path = self.record_path(task);
        match self.read_record(&path) {
            Ok(Some(record)) if &record.task == task => Some(record),
            Ok(Some(record)) => {
                warn!(task = %task, found = %record.task, "history record belongs to another task; ignoring");
                None
            }
            Ok(None) => None,
            Err(err @ HistoryError::UnsupportedVersion { .. }) => {
                warn!(task = %task, error = %err, "ignoring history record");
                None
            }
            Err(err @ HistoryError::Corrupt { .. }) => {
                warn!(task = %task, error = %err, "dropping corrupt history record");
                self.discard(&path);
                None
            }
            Err(err) => {
                warn!(task = %task, error = %err, "cannot read history record");
                None
            }
        }
    }

    fn record(&self, task: &TaskId, record: ExecutionRecord) -> Result<(), HistoryError> {
        let path = self.record_path(task);
        self.writers.with_lock(task, || {
            fs::create_dir_all(&self.dir)?;
            let payload = serde_json::to_vec_pretty(&EnvelopeOut {
                version: HISTORY_FORMAT_VERSION,
                record: &record,
            })
            .map_err(HistoryError::Encode)?;

            let mut tmp = NamedTempFile::new_in(&self.dir)?;
            tmp.write_all(&payload)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;

            info!(task = %task, "stored execution record (file)");
            Ok(())
        })
    }

    fn remove(&self, task: &TaskId) -> Result<(), HistoryError> {
        let path = self.record_path(task);
        self.writers.with_lock(task, || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        })
    }

    fn prune(&self, active: &[TaskId]) -> Result<usize, HistoryError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let keep = match self.read_record(&path) {
                Ok(Some(record)) => active.contains(&record.task),
                Ok(None) => true,
                Err(err) => {
                    debug!(error = %err, "pruning unreadable history record");
                    false
                }
            };
            if !keep {
                self.discard(&path);
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "pruned stale execution records (file)");
        }
        Ok(removed)
    }
}
