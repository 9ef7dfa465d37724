//! Client configuration.

use std::time::Duration;

use deltasync_sync::{BatchConfig, RetryPolicy};

/// Configuration for the [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// How calls are coalesced into round trips.
    pub batch: BatchConfig,
    /// Backoff for the initial snapshot and every resync.
    pub resync: RetryPolicy,
    /// Backoff for queries. Mutations are never retried.
    pub query_retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            resync: RetryPolicy::default(),
            query_retry: RetryPolicy::default()
                .with_initial(Duration::from_millis(50))
                .with_max_attempts(3),
        }
    }
}

impl ClientConfig {
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_resync(mut self, resync: RetryPolicy) -> Self {
        self.resync = resync;
        self
    }

    pub fn with_query_retry(mut self, query_retry: RetryPolicy) -> Self {
        self.query_retry = query_retry;
        self
    }
}
