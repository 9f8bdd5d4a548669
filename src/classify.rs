//! Failure classification against a policy's error markers.
//!
//! A marker matches when it equals the error string or occurs inside it. Permanent markers
//! are checked first: an error matching both a permanent and a retryable marker is
//! permanent. Empty markers never match.

use crate::policy::RetryPolicy;
use std::collections::BTreeSet;

/// How a failure string classifies under a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Matched a permanent failure marker; never retried.
    Permanent { marker: String },
    /// Matched a retryable marker.
    Retryable { marker: String },
    /// Matched neither list.
    Unrecognized,
}

impl ErrorClass {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    pub fn marker(&self) -> Option<&str> {
        match self {
            Self::Permanent { marker } | Self::Retryable { marker } => Some(marker),
            Self::Unrecognized => None,
        }
    }
}

/// Exact or substring match.
pub fn matches_marker(error: &str, marker: &str) -> bool {
    !marker.is_empty() && error.contains(marker)
}

/// First marker (in set order) matching `error`.
pub fn find_marker<'a>(error: &str, markers: &'a BTreeSet<String>) -> Option<&'a str> {
    markers.iter().map(String::as_str).find(|m| matches_marker(error, m))
}

/// Classify `error` under `policy`, permanent markers first.
pub fn classify(error: &str, policy: &RetryPolicy) -> ErrorClass {
    if let Some(marker) = find_marker(error, policy.permanent_failure_errors()) {
        return ErrorClass::Permanent { marker: marker.to_string() };
    }
    if let Some(marker) = find_marker(error, policy.retryable_errors()) {
        return ErrorClass::Retryable { marker: marker.to_string() };
    }
    ErrorClass::Unrecognized
}
