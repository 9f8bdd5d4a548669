//! Retry-or-dead-letter decisions for failed work items.
//!
//! Semantics, checked in this order:
//! 1. No policy for the task type: dead-letter.
//! 2. Error matches a permanent marker: dead-letter, even if it also matches a retryable one.
//! 3. `current_retries >= max_retries`: dead-letter.
//! 4. Error matches no retryable marker: dead-letter.
//! 5. Otherwise retry as attempt `current_retries + 1` after a jittered backoff.
//!
//! Only step 5 has a side effect: the attempt is appended to the item's in-memory history.
//! Persisting the updated work item is the caller's job.
//!
//! Example
//! ```rust
//! use std::sync::Arc;
//! use afterlife::{InMemoryPolicyRegistry, PolicyRegistry, RetryDecisionEngine, RetryPolicy};
//!
//! let registry = Arc::new(InMemoryPolicyRegistry::new());
//! registry
//!     .register(
//!         RetryPolicy::builder("portal_scan")
//!             .max_retries(5)
//!             .retryable(["RATE_LIMITED"])
//!             .permanent(["AUTHENTICATION_FAILED"])
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//! let engine = RetryDecisionEngine::new(registry);
//!
//! let verdict = engine.decide("w1", "portal_scan", "RATE_LIMITED", 2, None);
//! assert!(verdict.should_retry);
//! assert_eq!(verdict.attempt, 3);
//!
//! let verdict = engine.decide("w1", "portal_scan", "AUTHENTICATION_FAILED", 0, None);
//! assert!(verdict.move_to_dlq);
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::backoff::Backoff;
use crate::classify::{classify, ErrorClass};
use crate::clock::{Clock, SystemClock};
use crate::history::{RetryAttempt, RetryHistory};
use crate::registry::PolicyRegistry;

/// Why a verdict was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionReason {
    /// No retry policy is registered for the task type.
    NoPolicyFound,
    /// The error matched a permanent failure marker.
    PermanentFailure { marker: String },
    /// The item already used all of its retries.
    MaxRetriesExceeded { max_retries: u32 },
    /// The error matched no retryable marker.
    NonRetryableError,
    /// The error matched a retryable marker and a retry was scheduled.
    RetryableError { marker: String },
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPolicyFound => write!(f, "no retry policy"),
            Self::PermanentFailure { marker } => write!(f, "permanent failure: {}", marker),
            Self::MaxRetriesExceeded { .. } => write!(f, "max retries exceeded"),
            Self::NonRetryableError => write!(f, "not retryable"),
            Self::RetryableError { marker } => write!(f, "retryable error: {}", marker),
        }
    }
}

/// Verdict for one failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryResult {
    pub should_retry: bool,
    /// `Some` exactly when `should_retry` is set.
    pub next_retry_at: Option<DateTime<Utc>>,
    pub delay_ms: Option<u64>,
    pub reason: DecisionReason,
    /// Attempt number of the scheduled retry, or the retries already used for a dead-letter
    /// verdict.
    pub attempt: u32,
    pub move_to_dlq: bool,
}

impl RetryResult {
    fn dead_letter(reason: DecisionReason, attempt: u32) -> Self {
        Self {
            should_retry: false,
            next_retry_at: None,
            delay_ms: None,
            reason,
            attempt,
            move_to_dlq: true,
        }
    }
}

/// Classifies failures and schedules retries.
#[derive(Debug, Clone)]
pub struct RetryDecisionEngine {
    policies: Arc<dyn PolicyRegistry>,
    history: Arc<RetryHistory>,
    clock: Arc<dyn Clock>,
}

impl RetryDecisionEngine {
    /// Engine with a fresh history and the system clock.
    pub fn new(policies: Arc<dyn PolicyRegistry>) -> Self {
        Self::with_parts(policies, Arc::new(RetryHistory::default()), Arc::new(SystemClock))
    }

    pub fn with_parts(
        policies: Arc<dyn PolicyRegistry>,
        history: Arc<RetryHistory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { policies, history, clock }
    }

    pub fn policies(&self) -> &Arc<dyn PolicyRegistry> {
        &self.policies
    }

    pub fn history(&self) -> &Arc<RetryHistory> {
        &self.history
    }

    /// Decide whether the failed work item retries or goes to the dead letter queue.
    pub fn decide(
        &self,
        work_item_id: &str,
        task_type: &str,
        error: &str,
        current_retries: u32,
        context: Option<serde_json::Value>,
    ) -> RetryResult {
        let mut rng = rand::rng();
        self.decide_with_rng(work_item_id, task_type, error, current_retries, context, &mut rng)
    }

    /// [`decide`](Self::decide) with an injected RNG for the jitter.
    pub fn decide_with_rng<R: Rng + ?Sized>(
        &self,
        work_item_id: &str,
        task_type: &str,
        error: &str,
        current_retries: u32,
        context: Option<serde_json::Value>,
        rng: &mut R,
    ) -> RetryResult {
        let Some(policy) = self.policies.lookup(task_type) else {
            info!(
                target: "afterlife::decision",
                work_item_id,
                task_type,
                "no retry policy; dead-lettering"
            );
            return RetryResult::dead_letter(DecisionReason::NoPolicyFound, current_retries);
        };

        let class = classify(error, &policy);
        if let ErrorClass::Permanent { marker } = class {
            info!(
                target: "afterlife::decision",
                work_item_id,
                task_type,
                marker = %marker,
                "permanent failure; dead-lettering"
            );
            return RetryResult::dead_letter(
                DecisionReason::PermanentFailure { marker },
                current_retries,
            );
        }

        if current_retries >= policy.max_retries() {
            info!(
                target: "afterlife::decision",
                work_item_id,
                task_type,
                current_retries,
                max_retries = policy.max_retries(),
                "max retries exceeded; dead-lettering"
            );
            return RetryResult::dead_letter(
                DecisionReason::MaxRetriesExceeded { max_retries: policy.max_retries() },
                current_retries,
            );
        }

        let ErrorClass::Retryable { marker } = class else {
            info!(
                target: "afterlife::decision",
                work_item_id,
                task_type,
                error,
                "error not retryable; dead-lettering"
            );
            return RetryResult::dead_letter(DecisionReason::NonRetryableError, current_retries);
        };

        let attempt = current_retries.saturating_add(1);
        let delay_ms = Backoff::from_policy(&policy).delay_ms_with_rng(attempt, rng);
        let now = self.clock.now();
        let next_retry_at = deadline_after(now, delay_ms);

        self.history.record(
            work_item_id,
            RetryAttempt { attempt, timestamp: now, delay_ms, reason: error.to_string(), context },
        );

        debug!(
            target: "afterlife::decision",
            work_item_id,
            task_type,
            attempt,
            delay_ms,
            "retry scheduled"
        );
        RetryResult {
            should_retry: true,
            next_retry_at: Some(next_retry_at),
            delay_ms: Some(delay_ms),
            reason: DecisionReason::RetryableError { marker },
            attempt,
            move_to_dlq: false,
        }
    }

    /// Attempts recorded for `work_item_id`, if any.
    pub fn retry_history(&self, work_item_id: &str) -> Option<Vec<RetryAttempt>> {
        self.history.get(work_item_id)
    }
}

/// `now + delay_ms`, saturating at the latest representable instant.
pub(crate) fn deadline_after(now: DateTime<Utc>, delay_ms: u64) -> DateTime<Utc> {
    i64::try_from(delay_ms)
        .ok()
        .and_then(ChronoDuration::try_milliseconds)
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::policy::RetryPolicy;
    use crate::registry::InMemoryPolicyRegistry;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn engine_at(clock: Arc<ManualClock>) -> RetryDecisionEngine {
        let registry = InMemoryPolicyRegistry::with_policies([RetryPolicy::builder("portal_scan")
            .max_retries(5)
            .initial_delay_ms(2_000)
            .backoff_multiplier(2.0)
            .max_delay_ms(300_000)
            .jitter_percent(0.0)
            .retryable(["RATE_LIMITED", "TIMEOUT", "AUTH"])
            .permanent(["AUTHENTICATION_FAILED"])
            .build()
            .unwrap()])
        .unwrap();
        let history = Arc::new(RetryHistory::default());
        RetryDecisionEngine::with_parts(Arc::new(registry), history, clock)
    }

    fn engine() -> RetryDecisionEngine {
        engine_at(Arc::new(ManualClock::default()))
    }

    #[test]
    fn retryable_error_schedules_next_attempt() {
        let clock = Arc::new(ManualClock::default());
        let engine = engine_at(clock.clone());
        let result = engine.decide("w1", "portal_scan", "RATE_LIMITED", 2, None);
        assert!(result.should_retry);
        assert!(!result.move_to_dlq);
        assert_eq!(result.attempt, 3);
        assert_eq!(result.delay_ms, Some(8_000));
        assert_eq!(result.next_retry_at, Some(clock.now() + ChronoDuration::milliseconds(8_000)));
        assert_eq!(result.reason, DecisionReason::RetryableError { marker: "RATE_LIMITED".into() });
    }

    #[test]
    fn permanent_failure_short_circuits_at_zero_retries() {
        let engine = engine();
        let result = engine.decide("w1", "portal_scan", "AUTHENTICATION_FAILED", 0, None);
        assert!(!result.should_retry);
        assert!(result.move_to_dlq);
        assert!(result.reason.to_string().starts_with("permanent failure"));
        assert!(engine.retry_history("w1").is_none(), "no history for dead-letter verdicts");
    }

    #[test]
    fn permanent_checked_before_max_retries() {
        let result = engine().decide("w1", "portal_scan", "AUTHENTICATION_FAILED", 99, None);
        assert!(matches!(result.reason, DecisionReason::PermanentFailure { .. }));
    }

    #[test]
    fn missing_policy_dead_letters() {
        let result = engine().decide("w1", "unknown_task", "RATE_LIMITED", 0, None);
        assert!(result.move_to_dlq);
        assert_eq!(result.reason.to_string(), "no retry policy");
    }

    #[test]
    fn exhausted_retries_dead_letter() {
        let result = engine().decide("w1", "portal_scan", "RATE_LIMITED", 5, None);
        assert!(result.move_to_dlq);
        assert_eq!(result.reason.to_string(), "max retries exceeded");
        assert_eq!(result.attempt, 5);
    }

    #[test]
    fn unmatched_error_is_not_retryable() {
        let result = engine().decide("w1", "portal_scan", "PARSE_ERROR", 0, None);
        assert!(result.move_to_dlq);
        assert_eq!(result.reason, DecisionReason::NonRetryableError);
        assert_eq!(result.reason.to_string(), "not retryable");
    }

    #[test]
    fn retries_append_history_with_context() {
        let engine = engine();
        let ctx = serde_json::json!({ "portal": "sam.gov" });
        engine.decide("w9", "portal_scan", "TIMEOUT", 0, Some(ctx.clone()));
        engine.decide("w9", "portal_scan", "TIMEOUT", 1, None);
        let history = engine.retry_history("w9").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].attempt, 1);
        assert_eq!(history[0].delay_ms, 2_000);
        assert_eq!(history[0].context, Some(ctx));
        assert_eq!(history[1].attempt, 2);
        assert_eq!(history[1].reason, "TIMEOUT");
    }

    #[test]
    fn permanent_property_holds_for_any_retry_count() {
        let engine = engine();
        let mut rng = StdRng::seed_from_u64(1);
        for retries in 0..=10 {
            let result = engine.decide_with_rng(
                "w1",
                "portal_scan",
                "login: AUTHENTICATION_FAILED",
                retries,
                None,
                &mut rng,
            );
            assert!(!result.should_retry && result.move_to_dlq, "retries={retries}");
        }
    }
}
