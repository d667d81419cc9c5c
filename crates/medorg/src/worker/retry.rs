//! Worker: error -> pending.
//!
//! Periodically re-arms retriable error rows whose backoff has elapsed. The
//! `"No movie code"` class is never re-armed; those rows park in `error`
//! until an operator intervenes.

use std::time::Duration;

use tracing::{debug, info};

use super::Worker;
use crate::error::QueueError;
use crate::queue::{is_retriable, QueueStore};

const RETRY_BATCH: i64 = 10;

pub struct RetryScheduler {
    store: QueueStore,
    poll_interval: Duration,
}

impl RetryScheduler {
    pub fn new(store: QueueStore, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }
}

impl Worker for RetryScheduler {
    fn name(&self) -> &'static str {
        "retry-scheduler"
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn process_one(&self) -> Result<bool, QueueError> {
        let retryable = self.store.list_retryable_errors(RETRY_BATCH).await?;
        if retryable.is_empty() {
            return Ok(false);
        }

        let mut reset = 0usize;
        for item in retryable {
            if let Some(message) = &item.error_message {
                if !is_retriable(message) {
                    debug!(id = item.id, "skipping non-retriable error");
                    continue;
                }
            }
            if self.store.reset_for_retry(item.id).await?.is_some() {
                info!(
                    id = item.id,
                    attempt = item.retry_count,
                    "re-armed item for retry"
                );
                reset += 1;
            }
        }

        if reset > 0 {
            info!(reset, "retry pass finished");
        }
        Ok(reset > 0)
    }
}
