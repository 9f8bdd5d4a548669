//! Retry requeue loop.
//!
//! Each tick fetches failed, retryable items whose `next_retry_at` has passed and flips
//! them back to pending with the agent assignment cleared. Items are updated concurrently
//! up to `requeue_concurrency`; one item failing to update never blocks the others.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::RetrySchedulerConfig;
use crate::error::RecoveryError;
use crate::store::{WorkItemPatch, WorkQueueStore};
use crate::ticker::{spawn_periodic, PeriodicHandle, SingleFlight};
use crate::timeout::{bounded, DEFAULT_STORE_TIMEOUT};

/// Outcome of one requeue tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequeueReport {
    /// Items that were due.
    pub due: usize,
    pub requeued: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct RetryScheduler {
    queue: Arc<dyn WorkQueueStore>,
    clock: Arc<dyn Clock>,
    config: RetrySchedulerConfig,
    store_timeout: Duration,
    flight: SingleFlight,
}

impl RetryScheduler {
    pub fn new(queue: Arc<dyn WorkQueueStore>, config: RetrySchedulerConfig) -> Self {
        Self {
            queue,
            clock: Arc::new(SystemClock),
            config,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            flight: SingleFlight::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn config(&self) -> &RetrySchedulerConfig {
        &self.config
    }

    /// Run one requeue pass.
    ///
    /// Returns `Ok(None)` when another tick is still running. Fails only if the due items
    /// could not be fetched; per-item update failures are counted in the report.
    pub async fn tick(&self) -> Result<Option<RequeueReport>, RecoveryError> {
        let Some(_flight) = self.flight.try_acquire() else {
            debug!(target: "afterlife::scheduler", "previous requeue tick still running; skipping");
            return Ok(None);
        };

        let now = self.clock.now();
        let due = bounded(
            "work_queue.get_failed_retryable_items",
            self.store_timeout,
            self.queue.get_failed_retryable_items(now),
        )
        .await?;

        let mut report = RequeueReport { due: due.len(), ..Default::default() };
        if due.is_empty() {
            return Ok(Some(report));
        }

        let queue = &self.queue;
        let timeout = self.store_timeout;
        let results: Vec<_> = stream::iter(due)
            .map(|item| async move {
                let update = queue.update_item(&item.id, WorkItemPatch::requeue(now));
                let outcome = bounded("work_queue.update_item", timeout, update).await;
                (item, outcome)
            })
            .buffer_unordered(self.config.requeue_concurrency.max(1))
            .collect()
            .await;

        for (item, outcome) in results {
            match outcome {
                Ok(_) => {
                    report.requeued += 1;
                    debug!(
                        target: "afterlife::scheduler",
                        work_item_id = %item.id,
                        retries = item.retries,
                        "work item requeued"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        target: "afterlife::scheduler",
                        work_item_id = %item.id,
                        error = %e,
                        "failed to requeue work item"
                    );
                }
            }
        }

        info!(
            target: "afterlife::scheduler",
            due = report.due,
            requeued = report.requeued,
            failed = report.failed,
            "requeue tick complete"
        );
        Ok(Some(report))
    }

    /// Run [`tick`](Self::tick) every configured interval until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> PeriodicHandle {
        let interval = self.config.interval;
        spawn_periodic("retry_scheduler", interval, cancel, move || {
            let scheduler = Arc::clone(&self);
            async move {
                if let Err(e) = scheduler.tick().await {
                    error!(target: "afterlife::scheduler", error = %e, "requeue tick failed");
                }
            }
        })
    }
}
