//! Error types for failure recovery
//!
//! Retry verdicts are not errors: `decide` always answers with a
//! [`RetryResult`](crate::decision::RetryResult) whose reason carries the classification.
//! `RecoveryError` covers the explicit state-changing requests (dead-lettering, escalation,
//! reprocessing, policy updates) and the background lifecycle.
use std::time::Duration;

use crate::policy::PolicyError;
use crate::store::StoreError;

/// Unified error type for recovery operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecoveryError {
    /// No retry policy is registered for the task type
    #[error("no retry policy registered for task type '{task_type}'")]
    PolicyNotFound { task_type: String },
    /// A policy or policy patch failed validation
    #[error("invalid retry policy: {0}")]
    InvalidPolicy(PolicyError),
    /// The dead letter entry does not exist in the durable store
    #[error("dead letter entry '{id}' not found")]
    DeadLetterNotFound { id: String },
    /// The dead letter entry is flagged as not reprocessable
    #[error("dead letter entry '{id}' cannot be reprocessed")]
    ReprocessNotAllowed { id: String },
    /// The durable store rejected or failed a call
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
    /// An external call did not complete within its bound
    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: &'static str, timeout: Duration },
    /// A background task was started twice
    #[error("background task '{task}' is already running")]
    AlreadyRunning { task: &'static str },
    /// A background task did not shut down cleanly
    #[error("background task '{task}' failed to shut down: {reason}")]
    ShutdownFailed { task: &'static str, reason: String },
}

impl From<PolicyError> for RecoveryError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::NotFound { task_type } => RecoveryError::PolicyNotFound { task_type },
            other => RecoveryError::InvalidPolicy(other),
        }
    }
}

impl RecoveryError {
    /// Check if this error is due to a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error is a missing dead letter entry
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DeadLetterNotFound { .. } | Self::PolicyNotFound { .. })
    }

    /// Check if this error came from the durable store
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    /// Timeouts and unavailable stores are worth another try on the next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Persistence(store) => store.is_transient(),
            _ => false,
        }
    }
}
