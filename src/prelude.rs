//! Convenient re-exports for wiring a recovery service.
pub use crate::{
    backoff::{self, Backoff},
    clock::{Clock, SystemClock},
    config::RecoveryConfig,
    dead_letter::{DeadLetterRequest, EscalationOutcome, ReprocessOutcome},
    decision::{DecisionReason, RetryResult},
    error::RecoveryError,
    jitter::Jitter,
    notify::{Alert, AlertPriority, NotificationSink},
    policy::{RetryPolicy, RetryPolicyPatch},
    registry::{InMemoryPolicyRegistry, PolicyRegistry},
    service::{BackgroundTasks, FailureDisposition, RecoveryService},
    store::{DeadLetterRepository, DlqEntry, EscalationWrite, WorkItem, WorkQueueStore},
};
