//! Periodic background loops with cooperative shutdown.
//!
//! A loop waits one full period before its first tick, skips missed ticks instead of
//! bursting, and checks the cancellation token before every tick. A tick that has started
//! always runs to completion; shutdown waits for it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RecoveryError;

/// Non-blocking guard that lets at most one tick run at a time.
///
/// Shared by the scheduled loop and manual `tick()` calls, so an overlapping tick is
/// skipped rather than queued.
#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flight, or `None` if a tick is already running.
    pub fn try_acquire(&self) -> Option<FlightGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard { busy: &self.busy })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the flight on drop.
#[derive(Debug)]
pub struct FlightGuard<'a> {
    busy: &'a AtomicBool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Handle to a spawned periodic loop.
#[derive(Debug)]
pub struct PeriodicHandle {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the loop and wait up to `timeout` for the in-flight tick to finish.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), RecoveryError> {
        self.cancel.cancel();
        let abort = self.handle.abort_handle();
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(
                    target: "afterlife::ticker",
                    task = self.name,
                    error = %e,
                    "background loop panicked"
                );
                Err(RecoveryError::ShutdownFailed { task: self.name, reason: e.to_string() })
            }
            Err(_) => {
                abort.abort();
                warn!(
                    target: "afterlife::ticker",
                    task = self.name,
                    ?timeout,
                    "background loop did not stop in time; aborted"
                );
                Err(RecoveryError::ShutdownFailed {
                    task: self.name,
                    reason: format!("did not stop within {:?}", timeout),
                })
            }
        }
    }
}

/// Spawn `tick` every `period` until `cancel` fires.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> PeriodicHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let period = period.max(Duration::from_millis(1));
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick resolves immediately
        interval.tick().await;
        info!(target: "afterlife::ticker", task = name, ?period, "background loop started");
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(target: "afterlife::ticker", task = name, "background loop cancelled");
                    break;
                }
                _ = interval.tick() => tick().await,
            }
        }
        info!(target: "afterlife::ticker", task = name, "background loop stopped");
    });
    PeriodicHandle { name, cancel, handle }
}
