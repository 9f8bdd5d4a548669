//! Operator notifications.
//!
//! Notifications are fire-and-forget: [`notify_best_effort`] bounds the call with a timeout
//! and logs any failure instead of returning it. Transports (email, chat, pager) live
//! outside this crate behind [`NotificationSink`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

/// What an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A DLQ entry needs human review.
    DlqEscalation,
    /// The DLQ holds more entries than the configured threshold.
    DlqVolume,
}

/// Alert urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Normal,
    High,
    Critical,
}

/// An alert handed to the notification sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    /// Original work item, empty for queue-wide alerts.
    pub work_item_id: String,
    pub dlq_entry_id: Option<String>,
    pub reason: String,
    pub priority: AlertPriority,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}/{:?}] {}", self.kind, self.priority, self.reason)?;
        if !self.work_item_id.is_empty() {
            write!(f, " (work item {})", self.work_item_id)?;
        }
        Ok(())
    }
}

/// Delivery failure reported by a sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Transport for operator alerts.
#[async_trait]
pub trait NotificationSink: Send + Sync + fmt::Debug {
    async fn send_alert(&self, alert: Alert) -> Result<(), NotifyError>;
}

/// Send an alert, bounded by `timeout`. Failures are logged and swallowed.
pub async fn notify_best_effort(sink: &dyn NotificationSink, alert: Alert, timeout: Duration) {
    let kind = alert.kind;
    let dlq_id = alert.dlq_entry_id.clone().unwrap_or_default();
    match tokio::time::timeout(timeout, sink.send_alert(alert)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(
                target: "afterlife::notify",
                ?kind,
                dlq_id = %dlq_id,
                error = %e,
                "alert delivery failed"
            );
        }
        Err(_) => {
            warn!(
                target: "afterlife::notify",
                ?kind,
                dlq_id = %dlq_id,
                ?timeout,
                "alert delivery timed out"
            );
        }
    }
}

/// A no-op sink that discards all alerts.
#[derive(Clone, Debug, Default)]
pub struct NullNotifier;

#[async_trait]
impl NotificationSink for NullNotifier {
    async fn send_alert(&self, _alert: Alert) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// A sink that logs alerts using the `tracing` crate.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn send_alert(&self, alert: Alert) -> Result<(), NotifyError> {
        match alert.priority {
            AlertPriority::Critical | AlertPriority::High => {
                warn!(target: "afterlife::notify", alert = %alert, "operator_alert")
            }
            AlertPriority::Normal => {
                info!(target: "afterlife::notify", alert = %alert, "operator_alert")
            }
        }
        Ok(())
    }
}

/// A sink that stores alerts in memory, evicting the oldest past `capacity`.
#[derive(Clone, Debug)]
pub struct MemoryNotifier {
    alerts: Arc<Mutex<Vec<Alert>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            alerts: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemoryNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotifier {
    async fn send_alert(&self, alert: Alert) -> Result<(), NotifyError> {
        let mut guard = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(alert);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(reason: &str) -> Alert {
        Alert {
            kind: AlertKind::DlqEscalation,
            work_item_id: "w1".into(),
            dlq_entry_id: Some("d1".into()),
            reason: reason.into(),
            priority: AlertPriority::High,
        }
    }

    #[derive(Debug)]
    struct Broken;

    #[async_trait]
    impl NotificationSink for Broken {
        async fn send_alert(&self, _alert: Alert) -> Result<(), NotifyError> {
            Err(NotifyError("smtp down".into()))
        }
    }

    #[derive(Debug)]
    struct Hanging;

    #[async_trait]
    impl NotificationSink for Hanging {
        async fn send_alert(&self, _alert: Alert) -> Result<(), NotifyError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn memory_notifier_enforces_capacity() {
        let sink = MemoryNotifier::with_capacity(2);
        for i in 0..3 {
            sink.send_alert(alert(&format!("r{i}"))).await.unwrap();
        }
        let reasons: Vec<String> = sink.alerts().into_iter().map(|a| a.reason).collect();
        assert_eq!(reasons, vec!["r1", "r2"]);
        assert_eq!(sink.evicted(), 1);
    }

    #[tokio::test]
    async fn best_effort_swallows_errors() {
        notify_best_effort(&Broken, alert("x"), Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn best_effort_bounds_hanging_sinks() {
        notify_best_effort(&Hanging, alert("x"), Duration::from_millis(50)).await;
    }

    #[test]
    fn display_mentions_work_item() {
        let text = alert("failure count 10 reached").to_string();
        assert!(text.contains("failure count 10 reached"));
        assert!(text.contains("w1"));
    }
}
