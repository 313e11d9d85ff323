//! Passive fetch instrumentation.

use std::time::Duration;

use tracing::{debug, info};

use super::key::QueryKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    Failure,
}

/// Receives fetch timings. Implementations must not block; nothing in the
/// engine depends on what they do.
pub trait FetchObserver: Send + Sync {
    fn fetch_started(&self, key: &QueryKey);

    fn fetch_finished(&self, key: &QueryKey, elapsed: Duration, outcome: FetchOutcome);
}

/// Logs fetch timings through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl FetchObserver for TracingObserver {
    fn fetch_started(&self, key: &QueryKey) {
        debug!(key = %key, "Fetch started");
    }

    fn fetch_finished(&self, key: &QueryKey, elapsed: Duration, outcome: FetchOutcome) {
        info!(
            key = %key,
            elapsed_ms = elapsed.as_millis() as u64,
            outcome = ?outcome,
            "Fetch finished"
        );
    }
}
