//! Bounded readiness polling.
//!
//! Probes report an explicit [`Probe`] outcome. Only `NotReady` is retried;
//! `Fatal` aborts the wait, and cancellation is observed between and during
//! attempts rather than being mistaken for a failed probe.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::cancel::CancelSignal;
use crate::error::{FleetError, Result};

/// Default bound for readiness waits.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(300);

/// Default pause between readiness probes.
pub const DEFAULT_READY_INTERVAL: Duration = Duration::from_secs(5);

/// Outcome of a single readiness probe.
#[derive(Debug)]
pub enum Probe {
    /// The target is ready.
    Ready,
    /// Not yet; try again after the interval.
    NotReady(String),
    /// Stop polling and surface this error.
    Fatal(FleetError),
}

impl Probe {
    /// Classify the result of a probe attempt.
    ///
    /// Cancellation is fatal; every other error means "not ready yet".
    pub fn from_result(result: Result<bool>) -> Self {
        match result {
            Ok(true) => Probe::Ready,
            Ok(false) => Probe::NotReady("probe returned false".to_string()),
            Err(FleetError::Cancelled) => Probe::Fatal(FleetError::Cancelled),
            Err(e) => Probe::NotReady(e.to_string()),
        }
    }
}

/// Poll `probe` every `interval` until it reports ready or `timeout` elapses.
///
/// Returns `Ok(true)` on the first ready probe, `Ok(false)` when the timeout
/// elapses without success, and `Err` only for fatal probes or cancellation.
/// A probe still running at the deadline is abandoned.
pub async fn poll_until_ready<F, Fut>(
    label: &str,
    timeout: Duration,
    interval: Duration,
    cancel: &CancelSignal,
    mut probe: F,
) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe>,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    while start.elapsed() < timeout {
        if cancel.is_cancelled() {
            return Err(FleetError::Cancelled);
        }

        attempts += 1;
        let remaining = timeout.saturating_sub(start.elapsed());
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FleetError::Cancelled),
            outcome = tokio::time::timeout(remaining, probe()) => match outcome {
                Ok(outcome) => outcome,
                Err(_) => Probe::NotReady(format!("probe still running after {remaining:?}")),
            },
        };

        match outcome {
            Probe::Ready => {
                debug!(target_name = %label, attempts, "Ready");
                return Ok(true);
            }
            Probe::Fatal(e) => return Err(e),
            Probe::NotReady(reason) => {
                debug!(target_name = %label, attempts, reason = %reason, "Not ready yet");
            }
        }

        // Never sleep past the deadline.
        let pause = interval.min(timeout.saturating_sub(start.elapsed()));
        if pause.is_zero() {
            break;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FleetError::Cancelled),
            _ = tokio::time::sleep(pause) => {}
        }
    }

    debug!(target_name = %label, attempts, ?timeout, "Gave up waiting");
    Ok(false)
}
