use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SetupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSpec {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Why a poll loop ended without its condition being met. Both variants
/// carry the last snapshot seen, if any.
#[derive(Debug)]
pub enum PollError<T> {
    Timeout { elapsed: Duration, last: Option<T> },
    Cancelled { last: Option<T> },
}

impl<T> PollError<T> {
    pub fn last(&self) -> Option<&T> {
        match self {
            PollError::Timeout { last, .. } | PollError::Cancelled { last } => last.as_ref(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PollError::Timeout { .. })
    }

    /// `what` reads as "waiting for chain sync".
    pub fn into_setup_error(self, what: &str) -> SetupError {
        match self {
            PollError::Timeout { elapsed, .. } => SetupError::Timeout {
                what: what.to_string(),
                elapsed,
            },
            PollError::Cancelled { .. } => SetupError::Cancelled {
                what: what.to_string(),
            },
        }
    }
}

/// Call `check` every `spec.interval` until `satisfied` accepts a snapshot,
/// `spec.timeout` runs out, or `cancel` fires.
///
/// Errors from `check` are expected while services start up; they are logged
/// and retried. Every snapshot, satisfied or not, goes to `on_progress`. A
/// check still in flight at the deadline is abandoned, so the call returns
/// within `timeout` plus scheduling noise. Cancellation interrupts both the
/// in-flight check and the sleep between checks.
pub async fn poll_until<T, E, C, Fut, S, P>(
    cancel: &CancellationToken,
    spec: PollSpec,
    mut check: C,
    satisfied: S,
    mut on_progress: P,
) -> Result<T, PollError<T>>
where
    E: fmt::Display,
    C: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    S: Fn(&T) -> bool,
    P: FnMut(&T),
{
    let started = Instant::now();
    let deadline = started + spec.timeout;
    let mut last: Option<T> = None;
    let mut attempt: u32 = 0;

    loop {
        attempt = attempt.saturating_add(1);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled { last }),
            r = tokio::time::timeout_at(deadline, check()) => r,
        };

        match outcome {
            Ok(Ok(snapshot)) => {
                on_progress(&snapshot);
                if satisfied(&snapshot) {
                    return Ok(snapshot);
                }
                last = Some(snapshot);
            }
            Ok(Err(e)) => {
                tracing::debug!(attempt, error=%e, "readiness check failed, retrying");
            }
            Err(_) => {
                return Err(PollError::Timeout {
                    elapsed: started.elapsed(),
                    last,
                })
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::Timeout {
                elapsed: started.elapsed(),
                last,
            });
        }
        let wake = (now + spec.interval).min(deadline);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled { last }),
            _ = tokio::time::sleep_until(wake) => {}
        }
    }
}
