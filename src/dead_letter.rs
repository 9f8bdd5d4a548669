//! Dead letter lifecycle: creation, escalation, reprocessing, statistics.
//!
//! Semantics:
//! - Entries are keyed by the id the durable store assigns, never by the work item id.
//! - Creating an entry folds the item's retry history into its metadata and drops the
//!   folded attempts from that history. Entries with at least `escalation_failure_count`
//!   failures, or whose reason carries a high-priority marker, are escalated right away; a
//!   failed follow-up escalation is logged and does not fail the dead-lettering.
//! - Escalation is one-way and idempotent. The store flips the flag with a conditional
//!   write, so concurrent escalations of one entry send a single alert. Notification
//!   failures never fail it.
//! - Escalation and reprocessing read the durable store. Escalation falls back to the
//!   mirror only when the durable read itself fails.
//! - Reprocessing creates a fresh pending work item from the snapshot and drops the entry
//!   from the mirror; the durable row stays as an audit trail.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::DeadLetterConfig;
use crate::error::RecoveryError;
use crate::history::RetryHistory;
use crate::notify::{
    notify_best_effort, Alert, AlertKind, AlertPriority, NotificationSink, NullNotifier,
};
use crate::stats::DlqStatistics;
use crate::store::{
    DeadLetterRepository, DlqEntry, DlqEntryPatch, EscalationWrite, Metadata, NewDlqEntry,
    NewWorkItem, WorkItem, WorkItemStatus, WorkQueueStore,
};
use crate::timeout::{bounded, DEFAULT_STORE_TIMEOUT};

mod mirror;

pub use mirror::DeadLetterMirror;

/// Input for [`DeadLetterStore::move_to_dead_letter_queue`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterRequest {
    pub work_item_id: String,
    pub task_type: String,
    /// Snapshot of the work item's data.
    pub work_item_data: Value,
    pub failure_reason: String,
    pub failure_count: u32,
    pub can_be_reprocessed: bool,
    pub metadata: Metadata,
}

impl DeadLetterRequest {
    /// Request built from a work item, snapshotting its payload.
    pub fn from_work_item(item: &WorkItem, failure_reason: impl Into<String>) -> Self {
        let mut metadata = Metadata::new();
        if !item.metadata.is_empty() {
            metadata.insert("workItemMetadata".into(), Value::Object(item.metadata.clone()));
        }
        Self {
            work_item_id: item.id.clone(),
            task_type: item.task_type.clone(),
            work_item_data: item.payload.clone(),
            failure_reason: failure_reason.into(),
            failure_count: item.retries.saturating_add(1),
            can_be_reprocessed: true,
            metadata,
        }
    }
}

/// Result of an escalation request.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationOutcome {
    /// The entry was flagged now.
    Escalated(DlqEntry),
    /// The entry was already flagged; nothing changed and no alert was sent.
    AlreadyEscalated(DlqEntry),
}

impl EscalationOutcome {
    pub fn entry(&self) -> &DlqEntry {
        match self {
            Self::Escalated(e) | Self::AlreadyEscalated(e) => e,
        }
    }

    pub fn newly_escalated(&self) -> bool {
        matches!(self, Self::Escalated(_))
    }
}

/// Result of a successful reprocess.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReprocessOutcome {
    pub dlq_entry_id: String,
    pub new_work_item: WorkItem,
    pub reprocess_attempts: u32,
}

/// Dead letter lifecycle service.
#[derive(Debug)]
pub struct DeadLetterStore {
    repository: Arc<dyn DeadLetterRepository>,
    work_queue: Arc<dyn WorkQueueStore>,
    notifier: Arc<dyn NotificationSink>,
    history: Arc<RetryHistory>,
    clock: Arc<dyn Clock>,
    mirror: DeadLetterMirror,
    config: DeadLetterConfig,
    store_timeout: Duration,
    notify_timeout: Duration,
}

impl DeadLetterStore {
    pub fn builder(
        repository: Arc<dyn DeadLetterRepository>,
        work_queue: Arc<dyn WorkQueueStore>,
    ) -> DeadLetterStoreBuilder {
        DeadLetterStoreBuilder::new(repository, work_queue)
    }

    pub fn config(&self) -> &DeadLetterConfig {
        &self.config
    }

    pub fn mirror(&self) -> &DeadLetterMirror {
        &self.mirror
    }

    /// Persist a new DLQ entry for a failed work item.
    pub async fn move_to_dead_letter_queue(
        &self,
        request: DeadLetterRequest,
    ) -> Result<DlqEntry, RecoveryError> {
        let now = self.clock.now();
        let attempts = self.history.get(&request.work_item_id).unwrap_or_default();

        let mut metadata = request.metadata;
        metadata.insert("totalRetryAttempts".into(), Value::from(attempts.len()));
        metadata.insert(
            "retryHistory".into(),
            serde_json::to_value(&attempts).unwrap_or_else(|_| Value::Array(Vec::new())),
        );
        metadata.insert("deadLetteredAt".into(), Value::String(now.to_rfc3339()));

        let new_entry = NewDlqEntry {
            original_work_item_id: request.work_item_id.clone(),
            task_type: request.task_type,
            work_item_data: request.work_item_data,
            failure_reason: request.failure_reason,
            failure_count: request.failure_count,
            last_failure_at: now,
            can_be_reprocessed: request.can_be_reprocessed,
            metadata,
        };
        let entry = bounded(
            "dead_letter.create_entry",
            self.store_timeout,
            self.repository.create_entry(new_entry),
        )
        .await
        .map_err(|e| {
            error!(
                target: "afterlife::dead_letter",
                work_item_id = %request.work_item_id,
                error = %e,
                "failed to persist dead letter entry"
            );
            e
        })?;

        self.mirror.insert(entry.clone());
        self.history.discard(&request.work_item_id, &attempts);
        info!(
            target: "afterlife::dead_letter",
            dlq_id = %entry.id,
            work_item_id = %entry.original_work_item_id,
            task_type = %entry.task_type,
            failure_count = entry.failure_count,
            reason = %entry.failure_reason,
            "work item dead-lettered"
        );

        if let Some(reason) = self.immediate_escalation_reason(&entry) {
            match self.escalate_dlq_entry(&entry.id, &reason).await {
                Ok(outcome) => return Ok(outcome.entry().clone()),
                Err(e) => {
                    error!(
                        target: "afterlife::dead_letter",
                        dlq_id = %entry.id,
                        error = %e,
                        "follow-up escalation failed"
                    );
                }
            }
        }
        Ok(entry)
    }

    /// Flag an entry for mandatory human review.
    pub async fn escalate_dlq_entry(
        &self,
        id: &str,
        reason: &str,
    ) -> Result<EscalationOutcome, RecoveryError> {
        let entry = self.resolve_for_escalation(id).await?;
        if entry.escalated {
            debug!(target: "afterlife::dead_letter", dlq_id = %id, "entry already escalated");
            return Ok(EscalationOutcome::AlreadyEscalated(entry));
        }

        let now = self.clock.now();
        let mut metadata = Metadata::new();
        metadata.insert("escalatedAt".into(), Value::String(now.to_rfc3339()));
        metadata.insert("escalationReason".into(), Value::String(reason.to_string()));

        let write = bounded(
            "dead_letter.mark_escalated",
            self.store_timeout,
            self.repository.mark_escalated(id, metadata),
        )
        .await?;
        let updated = match write {
            EscalationWrite::Applied(updated) => updated,
            EscalationWrite::AlreadyEscalated(current) => {
                debug!(
                    target: "afterlife::dead_letter",
                    dlq_id = %id,
                    "entry escalated concurrently"
                );
                self.mirror.refresh(current.clone());
                return Ok(EscalationOutcome::AlreadyEscalated(current));
            }
        };
        self.mirror.refresh(updated.clone());
        warn!(
            target: "afterlife::dead_letter",
            dlq_id = %id,
            work_item_id = %updated.original_work_item_id,
            reason,
            "dead letter entry escalated for manual review"
        );

        let priority = if self.high_priority_marker(&updated.failure_reason).is_some() {
            AlertPriority::Critical
        } else {
            AlertPriority::High
        };
        let alert = Alert {
            kind: AlertKind::DlqEscalation,
            work_item_id: updated.original_work_item_id.clone(),
            dlq_entry_id: Some(updated.id.clone()),
            reason: reason.to_string(),
            priority,
        };
        notify_best_effort(self.notifier.as_ref(), alert, self.notify_timeout).await;

        Ok(EscalationOutcome::Escalated(updated))
    }

    /// Create a fresh pending work item from an entry's snapshot.
    pub async fn reprocess_dlq_entry(
        &self,
        id: &str,
        triggered_by: &str,
        reason: Option<&str>,
    ) -> Result<ReprocessOutcome, RecoveryError> {
        let lookup = self.repository.get_entry(id);
        let Some(entry) = bounded("dead_letter.get_entry", self.store_timeout, lookup).await? else {
            warn!(
                target: "afterlife::dead_letter",
                dlq_id = %id,
                "reprocess requested for unknown entry"
            );
            return Err(RecoveryError::DeadLetterNotFound { id: id.to_string() });
        };
        if !entry.can_be_reprocessed {
            warn!(
                target: "afterlife::dead_letter",
                dlq_id = %id,
                triggered_by,
                "entry is not reprocessable"
            );
            return Err(RecoveryError::ReprocessNotAllowed { id: id.to_string() });
        }

        let now = self.clock.now();
        let mut metadata = Metadata::new();
        metadata.insert("reprocessedFrom".into(), Value::String(entry.id.clone()));
        metadata.insert("reprocessedBy".into(), Value::String(triggered_by.to_string()));
        metadata.insert("reprocessedAt".into(), Value::String(now.to_rfc3339()));
        metadata.insert(
            "originalWorkItemId".into(),
            Value::String(entry.original_work_item_id.clone()),
        );
        metadata.insert(
            "originalFailureReason".into(),
            Value::String(entry.failure_reason.clone()),
        );
        if let Some(reason) = reason {
            metadata.insert("reprocessReason".into(), Value::String(reason.to_string()));
        }

        let new_item = NewWorkItem {
            task_type: entry.task_type.clone(),
            status: WorkItemStatus::Pending,
            retries: 0,
            can_retry: true,
            assigned_agent_id: None,
            payload: entry.work_item_data.clone(),
            metadata,
        };
        let create = self.work_queue.create_item(new_item);
        let created = bounded("work_queue.create_item", self.store_timeout, create).await?;

        let attempts = entry.reprocess_attempts.saturating_add(1);
        let mut entry_metadata = Metadata::new();
        entry_metadata.insert("lastReprocessedAt".into(), Value::String(now.to_rfc3339()));
        entry_metadata.insert("lastReprocessedBy".into(), Value::String(triggered_by.to_string()));
        let patch = DlqEntryPatch {
            reprocess_attempts: Some(attempts),
            reprocessed_work_item_id: Some(created.id.clone()),
            metadata: Some(entry_metadata),
            ..Default::default()
        };
        let update = self.repository.update_entry(id, patch);
        if let Err(e) = bounded("dead_letter.update_entry", self.store_timeout, update).await {
            error!(
                target: "afterlife::dead_letter",
                dlq_id = %id,
                new_work_item_id = %created.id,
                error = %e,
                "work item recreated but dead letter entry not updated"
            );
            return Err(e);
        }

        self.mirror.remove(id);
        self.history.clear(&entry.original_work_item_id);
        info!(
            target: "afterlife::dead_letter",
            dlq_id = %id,
            new_work_item_id = %created.id,
            triggered_by,
            reprocess_attempts = attempts,
            "dead letter entry reprocessed"
        );
        Ok(ReprocessOutcome {
            dlq_entry_id: id.to_string(),
            new_work_item: created,
            reprocess_attempts: attempts,
        })
    }

    /// Aggregate statistics from the durable store.
    pub async fn statistics(&self) -> Result<DlqStatistics, RecoveryError> {
        let entries = self.list_entries().await?;
        Ok(DlqStatistics::from_entries(&entries, self.clock.now()))
    }

    /// All entries from the durable store.
    pub async fn list_entries(&self) -> Result<Vec<DlqEntry>, RecoveryError> {
        let list = self.repository.list_entries();
        bounded("dead_letter.list_entries", self.store_timeout, list).await
    }

    /// First high-priority marker found in `reason`. Matching ignores case and treats
    /// spaces and dashes as underscores.
    pub fn high_priority_marker(&self, reason: &str) -> Option<&str> {
        let normalized: String = reason
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c.to_ascii_uppercase() })
            .collect();
        self.config
            .high_priority_markers
            .iter()
            .map(String::as_str)
            .find(|m| !m.is_empty() && normalized.contains(&m.to_ascii_uppercase()))
    }

    fn immediate_escalation_reason(&self, entry: &DlqEntry) -> Option<String> {
        if entry.failure_count >= self.config.escalation_failure_count {
            return Some(format!(
                "failure count {} reached escalation threshold {}",
                entry.failure_count, self.config.escalation_failure_count
            ));
        }
        self.high_priority_marker(&entry.failure_reason)
            .map(|marker| format!("high-priority failure: {}", marker))
    }

    async fn resolve_for_escalation(&self, id: &str) -> Result<DlqEntry, RecoveryError> {
        let lookup = self.repository.get_entry(id);
        match bounded("dead_letter.get_entry", self.store_timeout, lookup).await {
            Ok(Some(entry)) => Ok(entry),
            Ok(None) => {
                error!(
                    target: "afterlife::dead_letter",
                    dlq_id = %id,
                    "cannot escalate unknown dead letter entry"
                );
                Err(RecoveryError::DeadLetterNotFound { id: id.to_string() })
            }
            Err(e) => match self.mirror.get(id) {
                Some(entry) => {
                    warn!(
                        target: "afterlife::dead_letter",
                        dlq_id = %id,
                        error = %e,
                        "durable lookup failed; escalating from mirror"
                    );
                    Ok(entry)
                }
                None => Err(e),
            },
        }
    }
}

/// Builder for `DeadLetterStore`.
#[derive(Debug)]
pub struct DeadLetterStoreBuilder {
    repository: Arc<dyn DeadLetterRepository>,
    work_queue: Arc<dyn WorkQueueStore>,
    notifier: Arc<dyn NotificationSink>,
    history: Arc<RetryHistory>,
    clock: Arc<dyn Clock>,
    config: DeadLetterConfig,
    store_timeout: Duration,
    notify_timeout: Duration,
}

impl DeadLetterStoreBuilder {
    pub fn new(
        repository: Arc<dyn DeadLetterRepository>,
        work_queue: Arc<dyn WorkQueueStore>,
    ) -> Self {
        Self {
            repository,
            work_queue,
            notifier: Arc::new(NullNotifier),
            history: Arc::new(RetryHistory::default()),
            clock: Arc::new(SystemClock),
            config: DeadLetterConfig::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            notify_timeout: Duration::from_secs(5),
        }
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Share the retry history with the decision engine.
    pub fn history(mut self, history: Arc<RetryHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: DeadLetterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    pub fn build(self) -> DeadLetterStore {
        DeadLetterStore {
            mirror: DeadLetterMirror::new(self.config.mirror_capacity),
            repository: self.repository,
            work_queue: self.work_queue,
            notifier: self.notifier,
            history: self.history,
            clock: self.clock,
            config: self.config,
            store_timeout: self.store_timeout,
            notify_timeout: self.notify_timeout,
        }
    }
}
