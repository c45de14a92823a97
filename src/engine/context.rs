// src/engine/context.rs

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::BuildCache;
use crate::fingerprint::Fingerprinter;
use crate::history::HistoryStore;

/// Build-wide state shared by every worker of one run.
///
/// Created when a run starts and dropped when it ends, so the file-hash memo,
/// the per-key cache writers and the remote-cache circuit breaker never
/// outlive a run.
#[derive(Debug)]
pub struct BuildContext {
    run_id: u64,
    fingerprinter: Fingerprinter,
    history: Arc<dyn HistoryStore>,
    cache: BuildCache,
    cancellation: CancellationToken,
}

impl BuildContext {
    pub fn new(
        run_id: u64,
        fingerprinter: Fingerprinter,
        history: Arc<dyn HistoryStore>,
        cache: BuildCache,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            fingerprinter,
            history,
            cache,
            cancellation,
        }
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn fingerprinter(&self) -> &Fingerprinter {
        &self.fingerprinter
    }

    pub fn history(&self) -> &dyn HistoryStore {
        self.history.as_ref()
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    /// Run-wide token. Cancelling it cancels every node dispatched afterwards
    /// and every node running now.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}
