//! Bounded calls into external stores.
//!
//! Every store call made by this crate goes through [`bounded`], so a hung database turns
//! into a [`RecoveryError::Timeout`] for that one call instead of a stuck tick.

use std::future::Future;
use std::time::Duration;

use crate::error::RecoveryError;
use crate::store::StoreError;

/// Default bound for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Await `call`, failing with `Timeout { operation, .. }` once `timeout` elapses.
pub async fn bounded<T, F>(
    operation: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, RecoveryError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(RecoveryError::from),
        Err(_) => Err(RecoveryError::Timeout { operation, timeout }),
    }
}
