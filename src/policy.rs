//! Per-task-type retry policies.
//!
//! A policy fixes how many retries a task type gets, how the delay between them grows, and
//! which error markers are retryable or permanent. Markers are matched against the failure
//! string by exact match or substring (see [`crate::classify`]).
//!
//! Example
//! ```rust
//! use afterlife::RetryPolicy;
//!
//! let policy = RetryPolicy::builder("portal_scan")
//!     .max_retries(5)
//!     .initial_delay_ms(2_000)
//!     .backoff_multiplier(2.0)
//!     .max_delay_ms(300_000)
//!     .jitter_percent(10.0)
//!     .retryable(["RATE_LIMITED", "TIMEOUT"])
//!     .permanent(["AUTHENTICATION_FAILED"])
//!     .build()
//!     .unwrap();
//! assert_eq!(policy.task_type(), "portal_scan");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Errors produced while building, validating, or updating a retry policy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    /// No policy is registered for the task type.
    #[error("no retry policy registered for task type '{task_type}'")]
    NotFound { task_type: String },
    /// Task type must be a non-empty identifier.
    #[error("task type must not be empty")]
    EmptyTaskType,
    /// Multiplier must be finite and > 0.
    #[error("backoff_multiplier must be finite and > 0 (got {0})")]
    InvalidMultiplier(f64),
    /// Jitter percent must be finite and >= 0.
    #[error("jitter_percent must be finite and >= 0 (got {0})")]
    InvalidJitter(f64),
}

/// Retry policy for one task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    task_type: String,
    max_retries: u32,
    initial_delay_ms: u64,
    backoff_multiplier: f64,
    max_delay_ms: u64,
    jitter_percent: f64,
    #[serde(default)]
    retryable_errors: BTreeSet<String>,
    #[serde(default)]
    permanent_failure_errors: BTreeSet<String>,
}

impl RetryPolicy {
    /// Construct a new builder for `task_type` with defaults.
    pub fn builder(task_type: impl Into<String>) -> RetryPolicyBuilder {
        RetryPolicyBuilder::new(task_type)
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn initial_delay_ms(&self) -> u64 {
        self.initial_delay_ms
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    pub fn jitter_percent(&self) -> f64 {
        self.jitter_percent
    }

    pub fn retryable_errors(&self) -> &BTreeSet<String> {
        &self.retryable_errors
    }

    pub fn permanent_failure_errors(&self) -> &BTreeSet<String> {
        &self.permanent_failure_errors
    }

    /// Check invariants. Policies loaded through serde bypass the builder, so the registry
    /// validates again on insert.
    ///
    /// Jitter above 100% is allowed; jittered delays are clamped at zero. A cap below the
    /// initial delay is allowed too and simply caps every attempt.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.task_type.trim().is_empty() {
            return Err(PolicyError::EmptyTaskType);
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 0.0 {
            return Err(PolicyError::InvalidMultiplier(self.backoff_multiplier));
        }
        if !self.jitter_percent.is_finite() || self.jitter_percent < 0.0 {
            return Err(PolicyError::InvalidJitter(self.jitter_percent));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            tracing::warn!(
                target: "afterlife::policy",
                task_type = %self.task_type,
                initial_delay_ms = self.initial_delay_ms,
                max_delay_ms = self.max_delay_ms,
                "max delay is below the initial delay; every retry waits the capped delay"
            );
        }
        Ok(())
    }

    /// Produce the updated policy; the task type is never touched.
    pub fn apply(&self, patch: &RetryPolicyPatch) -> Result<RetryPolicy, PolicyError> {
        let mut next = self.clone();
        if let Some(v) = patch.max_retries {
            next.max_retries = v;
        }
        if let Some(v) = patch.initial_delay_ms {
            next.initial_delay_ms = v;
        }
        if let Some(v) = patch.backoff_multiplier {
            next.backoff_multiplier = v;
        }
        if let Some(v) = patch.max_delay_ms {
            next.max_delay_ms = v;
        }
        if let Some(v) = patch.jitter_percent {
            next.jitter_percent = v;
        }
        if let Some(v) = &patch.retryable_errors {
            next.retryable_errors = v.clone();
        }
        if let Some(v) = &patch.permanent_failure_errors {
            next.permanent_failure_errors = v.clone();
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial update for a registered policy. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicyPatch {
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub jitter_percent: Option<f64>,
    pub retryable_errors: Option<BTreeSet<String>>,
    pub permanent_failure_errors: Option<BTreeSet<String>>,
}

/// Builder for `RetryPolicy`.
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Create a builder with sane defaults: 3 retries, 1s doubling to 5 minutes, 10% jitter.
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            policy: RetryPolicy {
                task_type: task_type.into(),
                max_retries: 3,
                initial_delay_ms: 1_000,
                backoff_multiplier: 2.0,
                max_delay_ms: 300_000,
                jitter_percent: 10.0,
                retryable_errors: BTreeSet::new(),
                permanent_failure_errors: BTreeSet::new(),
            },
        }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.policy.max_retries = retries;
        self
    }

    pub fn initial_delay_ms(mut self, delay: u64) -> Self {
        self.policy.initial_delay_ms = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.policy.backoff_multiplier = multiplier;
        self
    }

    pub fn max_delay_ms(mut self, delay: u64) -> Self {
        self.policy.max_delay_ms = delay;
        self
    }

    pub fn jitter_percent(mut self, percent: f64) -> Self {
        self.policy.jitter_percent = percent;
        self
    }

    /// Add retryable error markers.
    pub fn retryable<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.retryable_errors.extend(markers.into_iter().map(Into::into));
        self
    }

    /// Add permanent failure markers.
    pub fn permanent<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.permanent_failure_errors.extend(markers.into_iter().map(Into::into));
        self
    }

    /// Build the retry policy, validating inputs.
    pub fn build(self) -> Result<RetryPolicy, PolicyError> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}
