//! Exponential backoff with caps and jitter.
//!
//! Attempt semantics: attempt `1` is the first retry. The delay for attempt `n` is
//! `initial_delay_ms * backoff_multiplier^(n-1)`, capped at `max_delay_ms`, then jittered by
//! `jitter_percent` in both directions, clamped at zero and rounded to the nearest
//! millisecond. The multiplier may be fractional.
//!
//! Example
//! ```rust
//! use afterlife::{backoff, RetryPolicy};
//!
//! let policy = RetryPolicy::builder("portal_scan")
//!     .initial_delay_ms(2_000)
//!     .backoff_multiplier(2.0)
//!     .max_delay_ms(300_000)
//!     .jitter_percent(0.0)
//!     .build()
//!     .unwrap();
//! assert_eq!(backoff::compute(1, &policy), 2_000);
//! assert_eq!(backoff::compute(2, &policy), 4_000);
//! assert_eq!(backoff::compute(9, &policy), 300_000); // capped from 512_000
//! ```
//!
//! Overflow behavior: attempts beyond `i32::MAX` are clamped before exponentiation and any
//! non-finite intermediate saturates to the cap.

use crate::jitter::Jitter;
use crate::policy::RetryPolicy;
use rand::Rng;

/// Backoff parameters extracted from a policy. Pure and `Copy`, so it is safe to share
/// between concurrent callers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    initial_delay_ms: u64,
    multiplier: f64,
    max_delay_ms: u64,
    jitter: Jitter,
}

impl Backoff {
    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self {
            initial_delay_ms: policy.initial_delay_ms(),
            multiplier: policy.backoff_multiplier(),
            max_delay_ms: policy.max_delay_ms(),
            jitter: Jitter::percent(policy.jitter_percent()),
        }
    }

    /// Delay before jitter, in fractional milliseconds.
    pub fn capped_delay_ms(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let cap = self.max_delay_ms as f64;
        if raw.is_finite() {
            raw.min(cap)
        } else {
            cap
        }
    }

    /// Jittered delay for `attempt` (1-based) using the thread-local RNG.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let mut rng = rand::rng();
        self.delay_ms_with_rng(attempt, &mut rng)
    }

    /// Jittered delay with a custom RNG (for testing)
    pub fn delay_ms_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> u64 {
        let capped = self.capped_delay_ms(attempt);
        let jittered = self.jitter.apply_with_rng(capped, rng);
        to_millis(jittered)
    }
}

/// Compute the retry delay in milliseconds for `attempt` under `policy`.
pub fn compute(attempt: u32, policy: &RetryPolicy) -> u64 {
    Backoff::from_policy(policy).delay_ms(attempt)
}

/// [`compute`] with an injected RNG.
pub fn compute_with_rng<R: Rng + ?Sized>(attempt: u32, policy: &RetryPolicy, rng: &mut R) -> u64 {
    Backoff::from_policy(policy).delay_ms_with_rng(attempt, rng)
}

fn to_millis(delay: f64) -> u64 {
    let rounded = delay.max(0.0).round();
    if rounded >= u64::MAX as f64 {
        u64::MAX
    } else {
        rounded as u64
    }
}
