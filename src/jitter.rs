//! Symmetric percentage jitter to prevent thundering herds
//!
//! A jitter of `p` percent moves a delay `d` uniformly within `[d - d*p/100, d + d*p/100]`,
//! clamped at zero. `p = 0` is deterministic.
//!
//! Notes:
//! - RNG: uses `rand`'s thread-local RNG by default; deterministic RNGs can be injected via
//!   `apply_with_rng`.
//! - Works in fractional milliseconds; rounding happens once, in [`crate::backoff`].
//!
//! Example:
//! ```rust
//! use afterlife::Jitter;
//!
//! let jitter = Jitter::percent(10.0);
//! let delay = jitter.apply(1_000.0);
//! assert!((900.0..=1_100.0).contains(&delay));
//! ```

use rand::{rng, Rng};

/// Jitter strategy for randomizing retry delays
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter {
    percent: f64,
}

impl Jitter {
    /// No jitter - use exact backoff delay
    pub fn none() -> Self {
        Self { percent: 0.0 }
    }

    /// Symmetric jitter of `percent` of the delay in both directions. Non-finite or negative
    /// inputs disable jitter. Values above 100 are kept; the result is clamped at zero.
    pub fn percent(percent: f64) -> Self {
        let percent = if percent.is_finite() { percent.max(0.0) } else { 0.0 };
        Self { percent }
    }

    pub fn as_percent(&self) -> f64 {
        self.percent
    }

    /// Half-width of the jitter window for `delay_ms`.
    pub fn span(&self, delay_ms: f64) -> f64 {
        delay_ms * self.percent / 100.0
    }

    /// Apply jitter to a delay in milliseconds
    pub fn apply(&self, delay_ms: f64) -> f64 {
        let mut rng = rng();
        self.apply_with_rng(delay_ms, &mut rng)
    }

    /// Apply jitter with a custom RNG (for testing)
    pub fn apply_with_rng<R: Rng + ?Sized>(&self, delay_ms: f64, rng: &mut R) -> f64 {
        let span = self.span(delay_ms);
        if !span.is_finite() || span <= 0.0 {
            return delay_ms.max(0.0);
        }
        let offset = rng.random_range(-span..=span);
        (delay_ms + offset).max(0.0)
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::none()
    }
}
