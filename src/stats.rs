//! DLQ statistics, always computed from durable-store rows.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

use crate::store::DlqEntry;

/// Window used for the "older than a day" counter.
pub const AGED_WINDOW_HOURS: i64 = 24;

/// Aggregate view of the dead letter queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqStatistics {
    pub total: usize,
    /// `can_be_reprocessed && !escalated`.
    pub reprocessable: usize,
    pub escalated: usize,
    /// Entries whose last failure is more than 24h before `now`.
    pub older_than_24h: usize,
    pub by_task_type: BTreeMap<String, usize>,
    pub by_failure_reason: BTreeMap<String, usize>,
}

impl DlqStatistics {
    pub fn from_entries(entries: &[DlqEntry], now: DateTime<Utc>) -> Self {
        let aged_cutoff = now - ChronoDuration::hours(AGED_WINDOW_HOURS);
        let mut stats = Self { total: entries.len(), ..Default::default() };
        for entry in entries {
            if entry.is_reprocessable() {
                stats.reprocessable += 1;
            }
            if entry.escalated {
                stats.escalated += 1;
            }
            if entry.last_failure_at < aged_cutoff {
                stats.older_than_24h += 1;
            }
            *stats.by_task_type.entry(entry.task_type.clone()).or_default() += 1;
            *stats.by_failure_reason.entry(entry.failure_reason.clone()).or_default() += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Metadata;
    use serde_json::Value;

    fn entry(
        task: &str,
        reason: &str,
        age_h: i64,
        reprocessable: bool,
        escalated: bool,
    ) -> DlqEntry {
        let now = Utc::now();
        DlqEntry {
            id: format!("{task}-{reason}-{age_h}"),
            original_work_item_id: "w".into(),
            task_type: task.into(),
            work_item_data: Value::Null,
            failure_reason: reason.into(),
            failure_count: 1,
            last_failure_at: now - ChronoDuration::hours(age_h),
            can_be_reprocessed: reprocessable,
            escalated,
            reprocess_attempts: 0,
            reprocessed_work_item_id: None,
            metadata: Metadata::new(),
            created_at: now,
        }
    }

    #[test]
    fn aggregates_counts_and_breakdowns() {
        let entries = vec![
            entry("portal_scan", "TIMEOUT", 1, true, false),
            entry("portal_scan", "AUTHENTICATION_FAILED", 30, true, true),
            entry("document_processing", "TIMEOUT", 72, false, false),
        ];
        let stats = DlqStatistics::from_entries(&entries, Utc::now());
        assert_eq!(stats.total, 3);
        assert_eq!(stats.reprocessable, 1);
        assert_eq!(stats.escalated, 1);
        assert_eq!(stats.older_than_24h, 2);
        assert_eq!(stats.by_task_type["portal_scan"], 2);
        assert_eq!(stats.by_task_type["document_processing"], 1);
        assert_eq!(stats.by_failure_reason["TIMEOUT"], 2);
    }

    #[test]
    fn empty_queue_is_all_zero() {
        assert_eq!(DlqStatistics::from_entries(&[], Utc::now()), DlqStatistics::default());
    }
}
