//! Contracts for the durable stores this crate drives.
//!
//! The work queue and the dead letter store are external: task rows and DLQ rows live in
//! whatever database the surrounding pipeline uses. These traits are the seams, and
//! [`memory`] holds in-memory implementations for tests and single-process deployments.
//!
//! Ids returned by `create_*` are authoritative; callers must key everything by them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod memory;

pub use memory::{InMemoryDeadLetterRepository, InMemoryWorkQueue};

/// Free-form metadata attached to work items and DLQ entries.
pub type Metadata = Map<String, Value>;

/// Errors raised by store implementations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The addressed record does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    /// The store could not be reached or did not answer; worth retrying.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store refused the write.
    #[error("store rejected request: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Work item status as seen by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A unit of task work tracked by the external queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: String,
    pub task_type: String,
    pub status: WorkItemStatus,
    pub retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub can_retry: bool,
    pub assigned_agent_id: Option<String>,
    pub last_error: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Fields for a work item about to be created; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkItem {
    pub task_type: String,
    pub status: WorkItemStatus,
    pub retries: u32,
    pub can_retry: bool,
    pub assigned_agent_id: Option<String>,
    pub payload: Value,
    pub metadata: Metadata,
}

/// Partial update for a work item. Outer `None` leaves a field unchanged; `Some(None)`
/// clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkItemPatch {
    pub status: Option<WorkItemStatus>,
    pub retries: Option<u32>,
    pub next_retry_at: Option<Option<DateTime<Utc>>>,
    pub last_retry_at: Option<Option<DateTime<Utc>>>,
    pub can_retry: Option<bool>,
    pub assigned_agent_id: Option<Option<String>>,
    pub last_error: Option<Option<String>>,
}

impl WorkItemPatch {
    /// Flip a due item back to pending.
    pub fn requeue(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(WorkItemStatus::Pending),
            assigned_agent_id: Some(None),
            next_retry_at: Some(None),
            last_retry_at: Some(Some(now)),
            ..Default::default()
        }
    }

    /// Park a failed item until `next_retry_at`.
    pub fn retry_scheduled(attempt: u32, next_retry_at: DateTime<Utc>, error: &str) -> Self {
        Self {
            status: Some(WorkItemStatus::Failed),
            retries: Some(attempt),
            next_retry_at: Some(Some(next_retry_at)),
            can_retry: Some(true),
            last_error: Some(Some(error.to_string())),
            ..Default::default()
        }
    }

    /// Take a dead-lettered item out of the retry path.
    pub fn dead_lettered(error: &str) -> Self {
        Self {
            status: Some(WorkItemStatus::Failed),
            can_retry: Some(false),
            next_retry_at: Some(None),
            last_error: Some(Some(error.to_string())),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, item: &mut WorkItem) {
        if let Some(status) = self.status {
            item.status = status;
        }
        if let Some(retries) = self.retries {
            item.retries = retries;
        }
        if let Some(next) = self.next_retry_at {
            item.next_retry_at = next;
        }
        if let Some(last) = self.last_retry_at {
            item.last_retry_at = last;
        }
        if let Some(can_retry) = self.can_retry {
            item.can_retry = can_retry;
        }
        if let Some(agent) = &self.assigned_agent_id {
            item.assigned_agent_id = agent.clone();
        }
        if let Some(err) = &self.last_error {
            item.last_error = err.clone();
        }
    }
}

/// A dead-lettered work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqEntry {
    /// Assigned by the durable store.
    pub id: String,
    pub original_work_item_id: String,
    pub task_type: String,
    /// Snapshot of the work item's data at dead-lettering time.
    pub work_item_data: Value,
    pub failure_reason: String,
    pub failure_count: u32,
    pub last_failure_at: DateTime<Utc>,
    pub can_be_reprocessed: bool,
    /// Only ever transitions from `false` to `true`.
    pub escalated: bool,
    pub reprocess_attempts: u32,
    pub reprocessed_work_item_id: Option<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl DlqEntry {
    /// Whether an operator may still reprocess this entry without review.
    pub fn is_reprocessable(&self) -> bool {
        self.can_be_reprocessed && !self.escalated
    }
}

/// Fields for a DLQ entry about to be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDlqEntry {
    pub original_work_item_id: String,
    pub task_type: String,
    pub work_item_data: Value,
    pub failure_reason: String,
    pub failure_count: u32,
    pub last_failure_at: DateTime<Utc>,
    pub can_be_reprocessed: bool,
    pub metadata: Metadata,
}

/// Partial update for a DLQ entry. Escalation goes through
/// [`DeadLetterRepository::mark_escalated`] instead, so a patch never touches `escalated`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DlqEntryPatch {
    /// Keys merged into the existing metadata.
    pub metadata: Option<Metadata>,
    pub reprocess_attempts: Option<u32>,
    pub reprocessed_work_item_id: Option<String>,
}

impl DlqEntryPatch {
    pub fn apply_to(&self, entry: &mut DlqEntry) {
        if let Some(metadata) = &self.metadata {
            for (k, v) in metadata {
                entry.metadata.insert(k.clone(), v.clone());
            }
        }
        if let Some(n) = self.reprocess_attempts {
            entry.reprocess_attempts = n;
        }
        if let Some(id) = &self.reprocessed_work_item_id {
            entry.reprocessed_work_item_id = Some(id.clone());
        }
    }
}

/// Result of [`DeadLetterRepository::mark_escalated`].
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationWrite {
    /// This call flipped `escalated` and merged the metadata.
    Applied(DlqEntry),
    /// The entry was already escalated; nothing was written.
    AlreadyEscalated(DlqEntry),
}

/// Work queue operations consumed by the retry scheduler and reprocessing.
#[async_trait]
pub trait WorkQueueStore: Send + Sync + std::fmt::Debug {
    /// Items with `status = failed`, `can_retry = true` and `next_retry_at <= now`.
    async fn get_failed_retryable_items(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkItem>, StoreError>;
    async fn update_item(&self, id: &str, patch: WorkItemPatch) -> Result<WorkItem, StoreError>;
    async fn create_item(&self, item: NewWorkItem) -> Result<WorkItem, StoreError>;
}

/// Durable dead letter storage. Authoritative for every statistics and eligibility read.
#[async_trait]
pub trait DeadLetterRepository: Send + Sync + std::fmt::Debug {
    async fn create_entry(&self, entry: NewDlqEntry) -> Result<DlqEntry, StoreError>;
    async fn update_entry(&self, id: &str, patch: DlqEntryPatch) -> Result<DlqEntry, StoreError>;
    /// Set `escalated` and merge `metadata`, but only if the entry is not escalated yet.
    /// The check and the write must be atomic for a given id (a conditional update such as
    /// `UPDATE .. WHERE escalated = false`), so concurrent callers see exactly one `Applied`.
    async fn mark_escalated(
        &self,
        id: &str,
        metadata: Metadata,
    ) -> Result<EscalationWrite, StoreError>;
    async fn get_entry(&self, id: &str) -> Result<Option<DlqEntry>, StoreError>;
    async fn list_entries(&self) -> Result<Vec<DlqEntry>, StoreError>;
}
