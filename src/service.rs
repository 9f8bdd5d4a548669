//! Failure recovery service: one object wiring the engine, the dead letter lifecycle and
//! the two background loops to injected collaborators.
//!
//! ```rust
//! use std::sync::Arc;
//! use afterlife::{InMemoryDeadLetterRepository, InMemoryWorkQueue, RecoveryService};
//!
//! let service = RecoveryService::builder(
//!     Arc::new(InMemoryWorkQueue::new()),
//!     Arc::new(InMemoryDeadLetterRepository::new()),
//! )
//! .build()
//! .unwrap();
//!
//! let verdict = service.decide("w1", "portal_scan", "RATE_LIMITED", 0, None);
//! assert!(verdict.should_retry);
//! assert_eq!(service.get_all_policies().len(), 5);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::RecoveryConfig;
use crate::dead_letter::{DeadLetterRequest, DeadLetterStore, EscalationOutcome, ReprocessOutcome};
use crate::decision::{RetryDecisionEngine, RetryResult};
use crate::error::RecoveryError;
use crate::history::{RetryAttempt, RetryHistory};
use crate::monitor::DlqHealthMonitor;
use crate::notify::{NotificationSink, NullNotifier};
use crate::policy::{RetryPolicy, RetryPolicyPatch};
use crate::presets;
use crate::registry::{InMemoryPolicyRegistry, PolicyRegistry};
use crate::scheduler::RetryScheduler;
use crate::stats::DlqStatistics;
use crate::store::{DeadLetterRepository, DlqEntry, WorkItem, WorkItemPatch, WorkQueueStore};
use crate::ticker::PeriodicHandle;
use crate::timeout::bounded;

/// What [`RecoveryService::handle_failure`] did with a failed work item.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureDisposition {
    /// The item was parked until its next retry time.
    RetryScheduled { verdict: RetryResult, item: WorkItem },
    /// The item was moved to the dead letter queue.
    DeadLettered { verdict: RetryResult, entry: DlqEntry },
}

#[derive(Debug)]
pub struct RecoveryService {
    config: RecoveryConfig,
    engine: RetryDecisionEngine,
    work_queue: Arc<dyn WorkQueueStore>,
    dead_letters: Arc<DeadLetterStore>,
    scheduler: Arc<RetryScheduler>,
    monitor: Arc<DlqHealthMonitor>,
    running: Arc<AtomicBool>,
}

impl RecoveryService {
    pub fn builder(
        work_queue: Arc<dyn WorkQueueStore>,
        dead_letter_repository: Arc<dyn DeadLetterRepository>,
    ) -> RecoveryServiceBuilder {
        RecoveryServiceBuilder::new(work_queue, dead_letter_repository)
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn engine(&self) -> &RetryDecisionEngine {
        &self.engine
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterStore> {
        &self.dead_letters
    }

    pub fn scheduler(&self) -> &Arc<RetryScheduler> {
        &self.scheduler
    }

    pub fn monitor(&self) -> &Arc<DlqHealthMonitor> {
        &self.monitor
    }

    /// Retry-or-dead-letter verdict for a failure. See [`RetryDecisionEngine::decide`].
    pub fn decide(
        &self,
        work_item_id: &str,
        task_type: &str,
        error: &str,
        current_retries: u32,
        context: Option<Value>,
    ) -> RetryResult {
        self.engine.decide(work_item_id, task_type, error, current_retries, context)
    }

    /// Decide on a failed item and persist the verdict: park it for retry, or dead-letter
    /// it and take it out of the retry path.
    pub async fn handle_failure(
        &self,
        item: &WorkItem,
        error: &str,
    ) -> Result<FailureDisposition, RecoveryError> {
        let verdict = self.engine.decide(&item.id, &item.task_type, error, item.retries, None);
        let timeout = self.config.store_timeout;

        if let Some(next_retry_at) = verdict.next_retry_at {
            let patch = WorkItemPatch::retry_scheduled(verdict.attempt, next_retry_at, error);
            let update = self.work_queue.update_item(&item.id, patch);
            let item = bounded("work_queue.update_item", timeout, update).await?;
            return Ok(FailureDisposition::RetryScheduled { verdict, item });
        }

        let mut request = DeadLetterRequest::from_work_item(item, error);
        request.metadata.insert("decision".into(), Value::String(verdict.reason.to_string()));
        let entry = self.dead_letters.move_to_dead_letter_queue(request).await?;
        let close = self.work_queue.update_item(&item.id, WorkItemPatch::dead_lettered(error));
        if let Err(e) = bounded("work_queue.update_item", timeout, close).await {
            warn!(
                target: "afterlife::service",
                work_item_id = %item.id,
                dlq_id = %entry.id,
                error = %e,
                "dead-lettered item could not be closed in the work queue"
            );
        }
        Ok(FailureDisposition::DeadLettered { verdict, entry })
    }

    pub async fn move_to_dead_letter_queue(
        &self,
        request: DeadLetterRequest,
    ) -> Result<DlqEntry, RecoveryError> {
        self.dead_letters.move_to_dead_letter_queue(request).await
    }

    pub async fn escalate_dlq_entry(
        &self,
        id: &str,
        reason: &str,
    ) -> Result<EscalationOutcome, RecoveryError> {
        self.dead_letters.escalate_dlq_entry(id, reason).await
    }

    pub async fn reprocess_dlq_entry(
        &self,
        id: &str,
        triggered_by: &str,
        reason: Option<&str>,
    ) -> Result<ReprocessOutcome, RecoveryError> {
        self.dead_letters.reprocess_dlq_entry(id, triggered_by, reason).await
    }

    /// Attempts recorded for a work item that is still in the retry path.
    pub fn get_retry_statistics(&self, work_item_id: &str) -> Option<Vec<RetryAttempt>> {
        self.engine.retry_history(work_item_id)
    }

    pub async fn get_dlq_statistics(&self) -> Result<DlqStatistics, RecoveryError> {
        self.dead_letters.statistics().await
    }

    pub fn register_policy(&self, policy: RetryPolicy) -> Result<(), RecoveryError> {
        self.engine.policies().register(policy).map_err(RecoveryError::from)
    }

    pub fn update_policy(
        &self,
        task_type: &str,
        patch: &RetryPolicyPatch,
    ) -> Result<RetryPolicy, RecoveryError> {
        self.engine.policies().update(task_type, patch).map_err(RecoveryError::from)
    }

    pub fn get_all_policies(&self) -> Vec<RetryPolicy> {
        self.engine.policies().snapshot()
    }

    /// Spawn the background loops enabled in the configuration.
    ///
    /// Fails with `AlreadyRunning` until the previous [`BackgroundTasks`] is shut down.
    pub fn start(&self) -> Result<BackgroundTasks, RecoveryError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(RecoveryError::AlreadyRunning { task: "recovery_service" });
        }

        let cancel = CancellationToken::new();
        let mut handles = Vec::new();
        if self.config.retry_scheduler.enabled {
            handles.push(Arc::clone(&self.scheduler).spawn(cancel.child_token()));
        }
        if self.config.health_monitor.enabled {
            handles.push(Arc::clone(&self.monitor).spawn(cancel.child_token()));
        }
        info!(
            target: "afterlife::service",
            retry_scheduler = self.config.retry_scheduler.enabled,
            health_monitor = self.config.health_monitor.enabled,
            "recovery service started"
        );
        Ok(BackgroundTasks { cancel, handles, running: Arc::clone(&self.running) })
    }
}

/// Handles to the loops spawned by [`RecoveryService::start`].
#[derive(Debug)]
pub struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Vec<PeriodicHandle>,
    running: Arc<AtomicBool>,
}

impl BackgroundTasks {
    /// Names of the running loops.
    pub fn names(&self) -> Vec<&'static str> {
        self.handles.iter().map(PeriodicHandle::name).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Token cancelled on shutdown; loops also stop when it is cancelled directly.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every loop, letting in-flight ticks finish within `timeout` each.
    ///
    /// All loops are stopped even if one fails; the first failure is returned.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), RecoveryError> {
        self.cancel.cancel();
        let mut first_error = None;
        for handle in self.handles {
            if let Err(e) = handle.shutdown(timeout).await {
                first_error.get_or_insert(e);
            }
        }
        self.running.store(false, Ordering::Release);
        info!(target: "afterlife::service", "recovery service stopped");
        first_error.map_or(Ok(()), Err)
    }
}

/// Builder for `RecoveryService`.
#[derive(Debug)]
pub struct RecoveryServiceBuilder {
    work_queue: Arc<dyn WorkQueueStore>,
    dead_letter_repository: Arc<dyn DeadLetterRepository>,
    policies: Option<Arc<dyn PolicyRegistry>>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    config: RecoveryConfig,
}

impl RecoveryServiceBuilder {
    pub fn new(
        work_queue: Arc<dyn WorkQueueStore>,
        dead_letter_repository: Arc<dyn DeadLetterRepository>,
    ) -> Self {
        Self {
            work_queue,
            dead_letter_repository,
            policies: None,
            notifier: Arc::new(NullNotifier),
            clock: Arc::new(SystemClock),
            config: RecoveryConfig::default(),
        }
    }

    /// Use a caller-supplied registry instead of one seeded with the presets.
    pub fn policies(mut self, policies: Arc<dyn PolicyRegistry>) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: RecoveryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<RecoveryService, RecoveryError> {
        let policies: Arc<dyn PolicyRegistry> = match self.policies {
            Some(registry) => registry,
            None => Arc::new(InMemoryPolicyRegistry::with_policies(presets::default_policies()?)?),
        };
        let config = self.config;
        let history = Arc::new(RetryHistory::new(config.history_limit, config.history_max_items));
        let clock = Arc::clone(&self.clock);
        let engine = RetryDecisionEngine::with_parts(policies, Arc::clone(&history), clock);

        let dead_letters = Arc::new(
            DeadLetterStore::builder(
                Arc::clone(&self.dead_letter_repository),
                Arc::clone(&self.work_queue),
            )
            .notifier(Arc::clone(&self.notifier))
            .history(history)
            .clock(Arc::clone(&self.clock))
            .config(config.dead_letter.clone())
            .store_timeout(config.store_timeout)
            .notify_timeout(config.notify_timeout)
            .build(),
        );
        let scheduler = Arc::new(
            RetryScheduler::new(Arc::clone(&self.work_queue), config.retry_scheduler.clone())
                .with_clock(Arc::clone(&self.clock))
                .with_store_timeout(config.store_timeout),
        );
        let monitor = Arc::new(
            DlqHealthMonitor::new(Arc::clone(&dead_letters), config.health_monitor.clone())
                .with_notifier(self.notifier, config.notify_timeout)
                .with_clock(self.clock),
        );

        Ok(RecoveryService {
            config,
            engine,
            work_queue: self.work_queue,
            dead_letters,
            scheduler,
            monitor,
            running: Arc::new(AtomicBool::new(false)),
        })
    }
}
