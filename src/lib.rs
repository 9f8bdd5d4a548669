#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Afterlife
//!
//! Failure handling for task pipelines: retry policies with exponential backoff and jitter,
//! a retry-or-dead-letter decision engine, the dead letter queue lifecycle, and background
//! loops that requeue due retries and escalate stale dead letters.
//!
//! ## Features
//!
//! - **Per-task-type retry policies** with permanent and retryable error markers
//! - **Backoff** with fractional multipliers, caps and symmetric jitter
//! - **Dead letter lifecycle**: creation, one-way escalation, reprocessing, statistics
//! - **Background loops** with single-flight ticks and graceful shutdown
//! - **Injected collaborators**: work queue, dead letter store, notification sink, clock
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use afterlife::{
//!     backoff, InMemoryPolicyRegistry, PolicyRegistry, RetryDecisionEngine, RetryPolicy,
//! };
//!
//! let policy = RetryPolicy::builder("document_processing")
//!     .max_retries(3)
//!     .initial_delay_ms(2_000)
//!     .jitter_percent(0.0)
//!     .retryable(["TIMEOUT"])
//!     .build()
//!     .unwrap();
//! assert_eq!(backoff::compute(2, &policy), 4_000);
//!
//! let registry = Arc::new(InMemoryPolicyRegistry::new());
//! registry.register(policy).unwrap();
//! let engine = RetryDecisionEngine::new(registry);
//! let verdict = engine.decide("w1", "document_processing", "upstream TIMEOUT", 0, None);
//! assert!(verdict.should_retry);
//! assert_eq!(verdict.delay_ms, Some(2_000));
//! ```

pub mod backoff;
pub mod classify;
pub mod clock;
pub mod config;
pub mod dead_letter;
pub mod decision;
pub mod error;
pub mod history;
pub mod jitter;
pub mod monitor;
pub mod notify;
pub mod policy;
pub mod prelude;
pub mod presets;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod stats;
pub mod store;
pub mod ticker;
pub mod timeout;

// Re-exports
pub use backoff::Backoff;
pub use classify::ErrorClass;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ConfigError, DeadLetterConfig, HealthMonitorConfig, RecoveryConfig, RetrySchedulerConfig,
};
pub use dead_letter::{
    DeadLetterRequest, DeadLetterStore, DeadLetterStoreBuilder, EscalationOutcome,
    ReprocessOutcome,
};
pub use decision::{DecisionReason, RetryDecisionEngine, RetryResult};
pub use error::RecoveryError;
pub use history::{RetryAttempt, RetryHistory};
pub use jitter::Jitter;
pub use monitor::{DlqHealthMonitor, HealthReport};
pub use notify::{
    Alert, AlertKind, AlertPriority, LogNotifier, MemoryNotifier, NotificationSink, NotifyError,
    NullNotifier,
};
pub use policy::{PolicyError, RetryPolicy, RetryPolicyBuilder, RetryPolicyPatch};
pub use registry::{InMemoryPolicyRegistry, PolicyRegistry};
pub use scheduler::{RequeueReport, RetryScheduler};
pub use service::{BackgroundTasks, FailureDisposition, RecoveryService, RecoveryServiceBuilder};
pub use stats::DlqStatistics;
pub use store::{
    DeadLetterRepository, DlqEntry, DlqEntryPatch, EscalationWrite, InMemoryDeadLetterRepository,
    InMemoryWorkQueue, Metadata, NewDlqEntry, NewWorkItem, StoreError, WorkItem, WorkItemPatch,
    WorkItemStatus, WorkQueueStore,
};
