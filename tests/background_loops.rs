mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use afterlife::{
    DeadLetterStore, DlqHealthMonitor, HealthMonitorConfig, InMemoryDeadLetterRepository,
    InMemoryWorkQueue, RecoveryConfig, RecoveryService, RequeueReport, RetryScheduler,
    RetrySchedulerConfig, WorkItemStatus,
};
use chrono::{Duration as ChronoDuration, Utc};
use common::{dlq_entry, failed_item, FlakyDeadLetterRepository, FlakyWorkQueue};

fn overdue(id: &str) -> afterlife::WorkItem {
    failed_item(id, "portal_scan", Utc::now() - ChronoDuration::minutes(1))
}

#[tokio::test]
async fn one_failing_update_does_not_block_the_rest() {
    let queue = FlakyWorkQueue::new(InMemoryWorkQueue::new());
    for id in ["a", "b", "c", "d"] {
        queue.inner.insert(overdue(id));
    }
    queue.fail_updates_for("b");

    let config = RetrySchedulerConfig { requeue_concurrency: 2, ..Default::default() };
    let scheduler = RetryScheduler::new(Arc::new(queue.clone()), config);
    let report = scheduler.tick().await.unwrap().unwrap();

    assert_eq!(report, RequeueReport { due: 4, requeued: 3, failed: 1 });
    for id in ["a", "c", "d"] {
        assert_eq!(queue.inner.get(id).unwrap().status, WorkItemStatus::Pending, "{id}");
    }
    assert_eq!(queue.inner.get("b").unwrap().status, WorkItemStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn overlapping_ticks_are_skipped_not_queued() {
    let queue = FlakyWorkQueue::new(InMemoryWorkQueue::new());
    queue.inner.insert(overdue("w1"));
    queue.slow_fetch(Duration::from_secs(2));
    let scheduler = RetryScheduler::new(Arc::new(queue.clone()), RetrySchedulerConfig::default());

    let (first, second) = tokio::join!(scheduler.tick(), scheduler.tick());
    let outcomes = [first.unwrap(), second.unwrap()];
    assert_eq!(outcomes.iter().filter(|o| o.is_none()).count(), 1);
    assert_eq!(queue.fetches.load(Ordering::SeqCst), 1);

    assert!(scheduler.tick().await.unwrap().is_some(), "flight released after the tick");
}

#[tokio::test]
async fn monitor_escalates_stale_entries_once() {
    let repo = FlakyDeadLetterRepository::new(InMemoryDeadLetterRepository::new());
    repo.inner.insert(dlq_entry("stale", 50, false));
    repo.inner.insert(dlq_entry("already", 500, true));
    repo.inner.insert(dlq_entry("recent", 3, false));

    let queue = Arc::new(InMemoryWorkQueue::new());
    let store = DeadLetterStore::builder(Arc::new(repo.clone()), queue).build();
    let monitor = DlqHealthMonitor::new(Arc::new(store), HealthMonitorConfig::default());

    let report = monitor.tick().await.unwrap().unwrap();
    assert_eq!(report.escalated, 1);
    assert_eq!(report.statistics.total, 3);
    assert_eq!(report.statistics.older_than_24h, 2);
    assert!(repo.inner.get("stale").unwrap().escalated);
    assert!(!repo.inner.get("recent").unwrap().escalated);
    assert_eq!(repo.escalation_updates.load(Ordering::SeqCst), 1);

    let report = monitor.tick().await.unwrap().unwrap();
    assert_eq!(report.escalated, 0);
    assert_eq!(repo.escalation_updates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn one_failed_escalation_does_not_stop_the_rest() {
    let repo = FlakyDeadLetterRepository::new(InMemoryDeadLetterRepository::new());
    for id in ["a", "b", "c"] {
        repo.inner.insert(dlq_entry(id, 50, false));
    }
    repo.fail_escalation_for("a");

    let queue = Arc::new(InMemoryWorkQueue::new());
    let store = DeadLetterStore::builder(Arc::new(repo.clone()), queue).build();
    let monitor = DlqHealthMonitor::new(Arc::new(store), HealthMonitorConfig::default());

    let report = monitor.tick().await.unwrap().unwrap();
    assert_eq!(report.stale, 3);
    assert_eq!(report.escalated, 2);
    assert_eq!(report.escalation_failures, 1);
    assert!(!repo.inner.get("a").unwrap().escalated);
    assert!(repo.inner.get("b").unwrap().escalated);
    assert!(repo.inner.get("c").unwrap().escalated);
}

#[tokio::test(start_paused = true)]
async fn scheduler_loop_requeues_and_shuts_down() {
    let queue = InMemoryWorkQueue::new();
    queue.insert(overdue("w1"));
    let mut config = RecoveryConfig::default();
    config.retry_scheduler.enabled = true;
    let repo = Arc::new(InMemoryDeadLetterRepository::new());
    let service =
        RecoveryService::builder(Arc::new(queue.clone()), repo).config(config).build().unwrap();

    let tasks = service.start().unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    let status = queue.get("w1").unwrap().status;
    assert_eq!(status, WorkItemStatus::Failed, "no tick before one interval");
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(queue.get("w1").unwrap().status, WorkItemStatus::Pending);

    tasks.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_the_in_flight_tick_finish() {
    let queue = FlakyWorkQueue::new(InMemoryWorkQueue::new());
    queue.inner.insert(overdue("w1"));
    queue.slow_fetch(Duration::from_secs(3));
    let mut config = RecoveryConfig::default();
    config.retry_scheduler.enabled = true;
    let repo = Arc::new(InMemoryDeadLetterRepository::new());
    let service =
        RecoveryService::builder(Arc::new(queue.clone()), repo).config(config).build().unwrap();

    let tasks = service.start().unwrap();
    tokio::time::sleep(Duration::from_millis(5_500)).await;
    assert_eq!(queue.fetches.load(Ordering::SeqCst), 1, "tick in flight");
    tasks.shutdown(Duration::from_secs(10)).await.unwrap();

    assert_eq!(queue.inner.get("w1").unwrap().status, WorkItemStatus::Pending);
    assert_eq!(queue.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn monitor_loop_survives_a_store_outage() {
    let repo = FlakyDeadLetterRepository::new(InMemoryDeadLetterRepository::new());
    repo.inner.insert(dlq_entry("old", 50, false));
    repo.set_reads_down(true);
    let mut config = RecoveryConfig::default();
    config.health_monitor.enabled = true;
    let queue = Arc::new(InMemoryWorkQueue::new());
    let service =
        RecoveryService::builder(queue, Arc::new(repo.clone())).config(config).build().unwrap();

    let tasks = service.start().unwrap();
    assert_eq!(tasks.names(), vec!["dlq_health_monitor"]);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(!repo.inner.get("old").unwrap().escalated);

    repo.set_reads_down(false);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(repo.inner.get("old").unwrap().escalated);

    tasks.shutdown(Duration::from_secs(1)).await.unwrap();
}
