//! Compile-time prelude coverage test.
use afterlife::prelude::*;
use afterlife::{InMemoryDeadLetterRepository, InMemoryWorkQueue};
use std::sync::Arc;

#[tokio::test]
async fn prelude_reexports_core_types() {
    let _jitter = Jitter::percent(10.0);
    let policy = RetryPolicy::builder("compliance_check").jitter_percent(0.0).build().unwrap();
    assert_eq!(Backoff::from_policy(&policy).delay_ms(1), 1_000);
    assert_eq!(backoff::compute(2, &policy), 2_000);

    let service: RecoveryService = RecoveryService::builder(
        Arc::new(InMemoryWorkQueue::new()),
        Arc::new(InMemoryDeadLetterRepository::new()),
    )
    .config(RecoveryConfig::default())
    .build()
    .unwrap();
    let verdict: RetryResult = service.decide("w1", "submission", "DUPLICATE_SUBMISSION", 0, None);
    assert!(matches!(verdict.reason, DecisionReason::PermanentFailure { .. }));

    let tasks: BackgroundTasks = service.start().unwrap();
    tasks.shutdown(std::time::Duration::from_secs(1)).await.unwrap();
}
