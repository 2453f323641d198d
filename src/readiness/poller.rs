//! Bounded, cancellable readiness polling
//!
//! Each iteration checks cancellation, pings the app, then queries and
//! classifies the tunnel status. Retryable outcomes sleep for the poll
//! interval; anything else ends the loop. Cancellation is only observed
//! between iterations, so its latency is bounded by the poll interval.
//! A single attempt may run as long as the time left before the deadline.

use crate::error::{Result, TunnelError};
use crate::readiness::prober::{ProbeOutcome, ReadinessProber};
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default deadline; matches how long the host allows an app to start
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(240);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub deadline: Duration,
    pub poll_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

pub struct ReadinessPoller {
    prober: ReadinessProber,
    settings: PollSettings,
}

impl ReadinessPoller {
    pub fn new(prober: ReadinessProber, settings: PollSettings) -> Self {
        Self { prober, settings }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Poll until the remote instance is ready.
    ///
    /// Fails with `Cancelled` if `cancel` is set at an iteration boundary,
    /// `Timeout` once the deadline has elapsed, and propagates fatal
    /// outcomes and probe errors immediately.
    pub async fn wait_until_ready(&self, cancel: &CancellationToken) -> Result<()> {
        let start = Instant::now();
        let mut attempt: u32 = 0;

        while start.elapsed() < self.settings.deadline {
            if cancel.is_cancelled() {
                info!(attempt, "Readiness polling cancelled");
                return Err(TunnelError::Cancelled("readiness polling"));
            }
            attempt += 1;

            let remaining = self.settings.deadline.saturating_sub(start.elapsed());
            let outcome = match timeout(remaining, self.attempt()).await {
                Ok(outcome) => outcome?,
                Err(_) => {
                    debug!(attempt, "Attempt still pending at the deadline");
                    break;
                }
            };

            match outcome {
                ProbeOutcome::Ready => {
                    info!(
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Remote instance is ready"
                    );
                    return Ok(());
                }
                ProbeOutcome::RetryableFailure(reason) => {
                    debug!(attempt, reason = %reason, "Not ready yet, will retry");
                }
                ProbeOutcome::FatalFailure(reason) => {
                    warn!(attempt, reason = %reason, "Remote instance cannot become ready");
                    return Err(TunnelError::FatalReadiness(reason));
                }
            }

            sleep(self.settings.poll_interval).await;
        }

        warn!(
            attempt,
            deadline_secs = self.settings.deadline.as_secs(),
            "Timed out waiting for remote instance"
        );
        Err(TunnelError::Timeout(self.settings.deadline))
    }

    async fn attempt(&self) -> Result<ProbeOutcome> {
        // Keep-alive nudge, sent even when the status alone would do.
        self.prober.ping_app().await?;
        self.prober.probe().await
    }
}
