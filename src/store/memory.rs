//! In-memory store implementations.
//!
//! Both stores are cheap to clone and share state between clones, so a test can keep one
//! handle for assertions while the service owns another.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    DeadLetterRepository, DlqEntry, DlqEntryPatch, EscalationWrite, Metadata, NewDlqEntry,
    NewWorkItem, StoreError, WorkItem, WorkItemPatch, WorkItemStatus, WorkQueueStore,
};

/// Work queue backed by a map keyed by id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkQueue {
    items: Arc<Mutex<BTreeMap<String, WorkItem>>>,
    creates: Arc<AtomicUsize>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite an item as-is.
    pub fn insert(&self, item: WorkItem) {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).insert(item.id.clone(), item);
    }

    pub fn get(&self, id: &str) -> Option<WorkItem> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).get(id).cloned()
    }

    pub fn items(&self) -> Vec<WorkItem> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
    }

    /// Number of `create_item` calls served.
    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkQueueStore for InMemoryWorkQueue {
    async fn get_failed_retryable_items(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items
            .values()
            .filter(|item| {
                item.status == WorkItemStatus::Failed
                    && item.can_retry
                    && item.next_retry_at.is_some_and(|due| due <= now)
            })
            .cloned()
            .collect())
    }

    async fn update_item(&self, id: &str, patch: WorkItemPatch) -> Result<WorkItem, StoreError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let item = items
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { kind: "work item", id: id.to_string() })?;
        patch.apply_to(item);
        Ok(item.clone())
    }

    async fn create_item(&self, new: NewWorkItem) -> Result<WorkItem, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let item = WorkItem {
            id: Uuid::new_v4().to_string(),
            task_type: new.task_type,
            status: new.status,
            retries: new.retries,
            next_retry_at: None,
            last_retry_at: None,
            can_retry: new.can_retry,
            assigned_agent_id: new.assigned_agent_id,
            last_error: None,
            payload: new.payload,
            metadata: new.metadata,
        };
        self.insert(item.clone());
        Ok(item)
    }
}

/// Dead letter store backed by a map keyed by the assigned id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeadLetterRepository {
    entries: Arc<Mutex<BTreeMap<String, DlqEntry>>>,
}

impl InMemoryDeadLetterRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry directly, as if another process had created it.
    pub fn insert(&self, entry: DlqEntry) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).insert(entry.id.clone(), entry);
    }

    pub fn get(&self, id: &str) -> Option<DlqEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterRepository for InMemoryDeadLetterRepository {
    async fn create_entry(&self, new: NewDlqEntry) -> Result<DlqEntry, StoreError> {
        let entry = DlqEntry {
            id: Uuid::new_v4().to_string(),
            original_work_item_id: new.original_work_item_id,
            task_type: new.task_type,
            work_item_data: new.work_item_data,
            failure_reason: new.failure_reason,
            failure_count: new.failure_count,
            last_failure_at: new.last_failure_at,
            can_be_reprocessed: new.can_be_reprocessed,
            escalated: false,
            reprocess_attempts: 0,
            reprocessed_work_item_id: None,
            metadata: new.metadata,
            created_at: Utc::now(),
        };
        self.insert(entry.clone());
        Ok(entry)
    }

    async fn update_entry(&self, id: &str, patch: DlqEntryPatch) -> Result<DlqEntry, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { kind: "dead letter entry", id: id.to_string() })?;
        patch.apply_to(entry);
        Ok(entry.clone())
    }

    async fn mark_escalated(
        &self,
        id: &str,
        metadata: Metadata,
    ) -> Result<EscalationWrite, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { kind: "dead letter entry", id: id.to_string() })?;
        if entry.escalated {
            return Ok(EscalationWrite::AlreadyEscalated(entry.clone()));
        }
        entry.escalated = true;
        entry.metadata.extend(metadata);
        Ok(EscalationWrite::Applied(entry.clone()))
    }

    async fn get_entry(&self, id: &str) -> Result<Option<DlqEntry>, StoreError> {
        Ok(self.get(id))
    }

    async fn list_entries(&self) -> Result<Vec<DlqEntry>, StoreError> {
        Ok(self.entries.lock().unwrap_or_else(PoisonError::into_inner).values().cloned().collect())
    }
}
