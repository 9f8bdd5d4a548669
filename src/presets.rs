//! Retry policy presets for the pipeline's task types.
//!
//! Each preset returns a [`RetryPolicyBuilder`] so callers can adjust a field before
//! building. [`default_policies`] builds all of them.
//!
//! ```rust
//! use afterlife::presets;
//!
//! let scan = presets::portal_scan().max_retries(8).build().unwrap();
//! assert_eq!(scan.max_retries(), 8);
//! assert!(scan.permanent_failure_errors().contains("AUTHENTICATION_FAILED"));
//! ```
//!
//! | task type             | retries | initial | x   | cap    |
//! |-----------------------|---------|---------|-----|--------|
//! | `portal_scan`         | 5       | 2s      | 2.0 | 5m     |
//! | `document_processing` | 3       | 5s      | 2.0 | 2m     |
//! | `proposal_generation` | 3       | 10s     | 1.5 | 5m     |
//! | `compliance_check`    | 4       | 3s      | 2.0 | 3m     |
//! | `submission`          | 2       | 30s     | 2.0 | 10m    |

use crate::policy::{PolicyError, RetryPolicy, RetryPolicyBuilder};

pub const PORTAL_SCAN: &str = "portal_scan";
pub const DOCUMENT_PROCESSING: &str = "document_processing";
pub const PROPOSAL_GENERATION: &str = "proposal_generation";
pub const COMPLIANCE_CHECK: &str = "compliance_check";
pub const SUBMISSION: &str = "submission";

/// Portal crawls: flaky networks and rate limits, but bad credentials never heal.
pub fn portal_scan() -> RetryPolicyBuilder {
    RetryPolicy::builder(PORTAL_SCAN)
        .max_retries(5)
        .initial_delay_ms(2_000)
        .backoff_multiplier(2.0)
        .max_delay_ms(300_000)
        .jitter_percent(10.0)
        .retryable([
            "RATE_LIMITED",
            "TIMEOUT",
            "NETWORK_ERROR",
            "SERVICE_UNAVAILABLE",
            "CONNECTION_RESET",
        ])
        .permanent([
            "AUTHENTICATION_FAILED",
            "INVALID_CREDENTIALS",
            "PORTAL_NOT_FOUND",
            "ACCESS_DENIED",
        ])
}

pub fn document_processing() -> RetryPolicyBuilder {
    RetryPolicy::builder(DOCUMENT_PROCESSING)
        .max_retries(3)
        .initial_delay_ms(5_000)
        .backoff_multiplier(2.0)
        .max_delay_ms(120_000)
        .jitter_percent(15.0)
        .retryable(["TIMEOUT", "PROCESSING_ERROR", "TEMPORARY_FAILURE", "STORAGE_UNAVAILABLE"])
        .permanent(["INVALID_FORMAT", "CORRUPTED_FILE", "UNSUPPORTED_TYPE", "FILE_TOO_LARGE"])
}

/// Generation calls an AI backend; quota and overload errors back off gently.
pub fn proposal_generation() -> RetryPolicyBuilder {
    RetryPolicy::builder(PROPOSAL_GENERATION)
        .max_retries(3)
        .initial_delay_ms(10_000)
        .backoff_multiplier(1.5)
        .max_delay_ms(300_000)
        .jitter_percent(20.0)
        .retryable(["AI_SERVICE_ERROR", "RATE_LIMITED", "TIMEOUT", "MODEL_OVERLOADED"])
        .permanent(["INVALID_REQUIREMENTS", "CONTENT_POLICY_VIOLATION", "QUOTA_EXCEEDED"])
}

pub fn compliance_check() -> RetryPolicyBuilder {
    RetryPolicy::builder(COMPLIANCE_CHECK)
        .max_retries(4)
        .initial_delay_ms(3_000)
        .backoff_multiplier(2.0)
        .max_delay_ms(180_000)
        .jitter_percent(10.0)
        .retryable(["TIMEOUT", "SERVICE_UNAVAILABLE", "VALIDATION_SERVICE_ERROR"])
        .permanent(["INVALID_DOCUMENT", "MISSING_REQUIRED_FIELDS", "COMPLIANCE_VIOLATION"])
}

/// Submissions are not idempotent on every portal, so they get few, slow retries.
pub fn submission() -> RetryPolicyBuilder {
    RetryPolicy::builder(SUBMISSION)
        .max_retries(2)
        .initial_delay_ms(30_000)
        .backoff_multiplier(2.0)
        .max_delay_ms(600_000)
        .jitter_percent(5.0)
        .retryable(["NETWORK_ERROR", "TIMEOUT", "PORTAL_UNAVAILABLE"])
        .permanent([
            "DEADLINE_MISSED",
            "SUBMISSION_REJECTED",
            "DUPLICATE_SUBMISSION",
            "AUTHENTICATION_FAILED",
        ])
}

/// Build every preset.
pub fn default_policies() -> Result<Vec<RetryPolicy>, PolicyError> {
    [portal_scan(), document_processing(), proposal_generation(), compliance_check(), submission()]
        .into_iter()
        .map(RetryPolicyBuilder::build)
        .collect()
}
