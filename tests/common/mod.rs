#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use afterlife::{
    Alert, DeadLetterRepository, DlqEntry, DlqEntryPatch, EscalationWrite,
    InMemoryDeadLetterRepository,
    InMemoryWorkQueue, Metadata, NewDlqEntry, NewWorkItem, NotificationSink, NotifyError,
    StoreError, WorkItem, WorkItemPatch, WorkItemStatus, WorkQueueStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

pub fn failed_item(id: &str, task_type: &str, due_at: DateTime<Utc>) -> WorkItem {
    WorkItem {
        id: id.into(),
        task_type: task_type.into(),
        status: WorkItemStatus::Failed,
        retries: 1,
        next_retry_at: Some(due_at),
        last_retry_at: None,
        can_retry: true,
        assigned_agent_id: Some("agent-9".into()),
        last_error: Some("TIMEOUT".into()),
        payload: Value::Null,
        metadata: Metadata::new(),
    }
}

pub fn dlq_entry(id: &str, age_hours: i64, escalated: bool) -> DlqEntry {
    let now = Utc::now();
    DlqEntry {
        id: id.into(),
        original_work_item_id: format!("work-{id}"),
        task_type: "proposal_generation".into(),
        work_item_data: serde_json::json!({ "rfpId": id }),
        failure_reason: "AI_SERVICE_ERROR".into(),
        failure_count: 3,
        last_failure_at: now - ChronoDuration::hours(age_hours),
        can_be_reprocessed: true,
        escalated,
        reprocess_attempts: 0,
        reprocessed_work_item_id: None,
        metadata: Metadata::new(),
        created_at: now - ChronoDuration::hours(age_hours),
    }
}

/// Work queue whose updates fail for selected ids, and whose due-item query can be slowed.
#[derive(Debug, Clone, Default)]
pub struct FlakyWorkQueue {
    pub inner: InMemoryWorkQueue,
    failing_updates: Arc<Mutex<HashSet<String>>>,
    fetch_delay: Arc<Mutex<Option<Duration>>>,
    pub fetches: Arc<AtomicUsize>,
}

impl FlakyWorkQueue {
    pub fn new(inner: InMemoryWorkQueue) -> Self {
        Self { inner, ..Default::default() }
    }

    pub fn fail_updates_for(&self, id: &str) {
        self.failing_updates.lock().unwrap().insert(id.to_string());
    }

    pub fn slow_fetch(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl WorkQueueStore for FlakyWorkQueue {
    async fn get_failed_retryable_items(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkItem>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.get_failed_retryable_items(now).await
    }

    async fn update_item(&self, id: &str, patch: WorkItemPatch) -> Result<WorkItem, StoreError> {
        if self.failing_updates.lock().unwrap().contains(id) {
            return Err(StoreError::Unavailable(format!("update of {id} refused")));
        }
        self.inner.update_item(id, patch).await
    }

    async fn create_item(&self, item: NewWorkItem) -> Result<WorkItem, StoreError> {
        self.inner.create_item(item).await
    }
}

/// Dead letter store that can be switched into an outage for reads or writes.
#[derive(Debug, Clone, Default)]
pub struct FlakyDeadLetterRepository {
    pub inner: InMemoryDeadLetterRepository,
    reads_down: Arc<AtomicBool>,
    creates_down: Arc<AtomicBool>,
    failing_escalations: Arc<Mutex<HashSet<String>>>,
    read_delay: Arc<Mutex<Option<Duration>>>,
    /// Escalation writes that actually flipped the flag.
    pub escalation_updates: Arc<AtomicUsize>,
}

impl FlakyDeadLetterRepository {
    pub fn new(inner: InMemoryDeadLetterRepository) -> Self {
        Self { inner, ..Default::default() }
    }

    pub fn set_reads_down(&self, down: bool) {
        self.reads_down.store(down, Ordering::SeqCst);
    }

    pub fn set_creates_down(&self, down: bool) {
        self.creates_down.store(down, Ordering::SeqCst);
    }

    pub fn fail_escalation_for(&self, id: &str) {
        self.failing_escalations.lock().unwrap().insert(id.to_string());
    }

    pub fn slow_reads(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }

    async fn before_read(&self) -> Result<(), StoreError> {
        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.reads_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("read replica down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DeadLetterRepository for FlakyDeadLetterRepository {
    async fn create_entry(&self, entry: NewDlqEntry) -> Result<DlqEntry, StoreError> {
        if self.creates_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("dlq table locked".into()));
        }
        self.inner.create_entry(entry).await
    }

    async fn update_entry(&self, id: &str, patch: DlqEntryPatch) -> Result<DlqEntry, StoreError> {
        self.inner.update_entry(id, patch).await
    }

    async fn mark_escalated(
        &self,
        id: &str,
        metadata: Metadata,
    ) -> Result<EscalationWrite, StoreError> {
        if self.failing_escalations.lock().unwrap().contains(id) {
            return Err(StoreError::Unavailable(format!("escalation of {id} refused")));
        }
        let write = self.inner.mark_escalated(id, metadata).await?;
        if matches!(write, EscalationWrite::Applied(_)) {
            self.escalation_updates.fetch_add(1, Ordering::SeqCst);
        }
        Ok(write)
    }

    async fn get_entry(&self, id: &str) -> Result<Option<DlqEntry>, StoreError> {
        self.before_read().await?;
        self.inner.get_entry(id).await
    }

    async fn list_entries(&self) -> Result<Vec<DlqEntry>, StoreError> {
        self.before_read().await?;
        self.inner.list_entries().await
    }
}

/// Sink that always fails, counting attempts.
#[derive(Debug, Clone, Default)]
pub struct BrokenNotifier {
    pub attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl NotificationSink for BrokenNotifier {
    async fn send_alert(&self, _alert: Alert) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(NotifyError("pager gateway unreachable".into()))
    }
}

#[derive(Clone)]
pub struct SharedWriter(pub Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

pub struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Install a thread-local subscriber writing into the returned buffer.
pub fn capture_logs() -> (Arc<Mutex<Vec<u8>>>, tracing::subscriber::DefaultGuard) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
        .with_target(true)
        .with_ansi(false)
        .without_time()
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (buffer, guard)
}

pub fn logs(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8(buffer.lock().unwrap().clone()).unwrap()
}
