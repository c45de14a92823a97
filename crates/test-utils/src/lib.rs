//! Shared helpers for cachedag's integration tests: recording task actions,
//! a fluent graph builder, a fake executor backend and in-memory remote
//! cache transports.

pub mod actions;
pub mod builders;
pub mod fake_executor;
pub mod transports;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Upper bound for any single build driven by a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Install a test-captured subscriber once per test binary.
///
/// Honors `CACHEDAG_LOG` like the binary does, defaulting to `info` for
/// cachedag's own targets. Output is only shown for failing tests unless
/// run with `--nocapture`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("CACHEDAG_LOG")
            .unwrap_or_else(|_| EnvFilter::new("warn,cachedag=info"));

        // Another harness may already have installed one.
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Await `f`, panicking if it takes longer than [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("build did not finish within {TEST_TIMEOUT:?}"),
    }
}
