//! DLQ health monitor.
//!
//! Each tick reads the durable store, raises a volume alert when the queue is over its
//! threshold, and escalates entries that have sat unescalated for longer than
//! `stale_after`. Entries already reprocessed are left alone.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::HealthMonitorConfig;
use crate::dead_letter::{DeadLetterStore, EscalationOutcome};
use crate::error::RecoveryError;
use crate::notify::{
    notify_best_effort, Alert, AlertKind, AlertPriority, NotificationSink, NullNotifier,
};
use crate::stats::DlqStatistics;
use crate::ticker::{spawn_periodic, PeriodicHandle, SingleFlight};

/// Outcome of one health tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub statistics: DlqStatistics,
    pub volume_alert: bool,
    /// Unescalated entries past `stale_after`.
    pub stale: usize,
    pub escalated: usize,
    pub escalation_failures: usize,
}

#[derive(Debug)]
pub struct DlqHealthMonitor {
    dead_letters: Arc<DeadLetterStore>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    config: HealthMonitorConfig,
    notify_timeout: Duration,
    flight: SingleFlight,
}

impl DlqHealthMonitor {
    pub fn new(dead_letters: Arc<DeadLetterStore>, config: HealthMonitorConfig) -> Self {
        Self {
            dead_letters,
            notifier: Arc::new(NullNotifier),
            clock: Arc::new(SystemClock),
            config,
            notify_timeout: Duration::from_secs(5),
            flight: SingleFlight::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>, timeout: Duration) -> Self {
        self.notifier = notifier;
        self.notify_timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    /// Run one health pass. `Ok(None)` means another tick is still running.
    pub async fn tick(&self) -> Result<Option<HealthReport>, RecoveryError> {
        let Some(_flight) = self.flight.try_acquire() else {
            debug!(target: "afterlife::monitor", "previous health tick still running; skipping");
            return Ok(None);
        };

        let now = self.clock.now();
        let entries = self.dead_letters.list_entries().await?;
        let statistics = DlqStatistics::from_entries(&entries, now);
        let mut report = HealthReport { statistics, ..Default::default() };

        let threshold = self.config.volume_alert_threshold;
        if report.statistics.total > threshold {
            report.volume_alert = true;
            warn!(
                target: "afterlife::monitor",
                total = report.statistics.total,
                threshold,
                escalated = report.statistics.escalated,
                "dead letter queue volume above threshold"
            );
            let alert = Alert {
                kind: AlertKind::DlqVolume,
                work_item_id: String::new(),
                dlq_entry_id: None,
                reason: format!(
                    "dead letter queue holds {} entries (threshold {})",
                    report.statistics.total, threshold
                ),
                priority: AlertPriority::High,
            };
            notify_best_effort(self.notifier.as_ref(), alert, self.notify_timeout).await;
        }

        let Some(cutoff) = ChronoDuration::from_std(self.config.stale_after)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return Ok(Some(report));
        };
        let stale_hours = self.config.stale_after.as_secs() / 3_600;
        let reason = format!("unresolved in dead letter queue for more than {} hours", stale_hours);

        for entry in entries.iter().filter(|e| {
            !e.escalated && e.reprocessed_work_item_id.is_none() && e.last_failure_at < cutoff
        }) {
            report.stale += 1;
            match self.dead_letters.escalate_dlq_entry(&entry.id, &reason).await {
                Ok(EscalationOutcome::Escalated(_)) => report.escalated += 1,
                Ok(EscalationOutcome::AlreadyEscalated(_)) => {}
                Err(e) => {
                    report.escalation_failures += 1;
                    error!(
                        target: "afterlife::monitor",
                        dlq_id = %entry.id,
                        error = %e,
                        "stale entry escalation failed"
                    );
                }
            }
        }

        info!(
            target: "afterlife::monitor",
            total = report.statistics.total,
            stale = report.stale,
            escalated = report.escalated,
            "health tick complete"
        );
        Ok(Some(report))
    }

    /// Run [`tick`](Self::tick) every configured interval until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> PeriodicHandle {
        let interval = self.config.interval;
        spawn_periodic("dlq_health_monitor", interval, cancel, move || {
            let monitor = Arc::clone(&self);
            async move {
                if let Err(e) = monitor.tick().await {
                    error!(target: "afterlife::monitor", error = %e, "health tick failed");
                }
            }
        })
    }
}
