//! One-time readiness gate in front of the first test run.

use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::probes::HealthCheckTarget;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("services did not become healthy within {waited:?} (not ready: {})", .not_ready.join(", "))]
    Timeout {
        waited: Duration,
        not_ready: Vec<String>,
    },
    #[error("health gate cancelled")]
    Cancelled,
}

/// How the gate opened.
#[derive(Debug, Clone, Copy)]
pub struct GateReport {
    pub rounds: u32,
    pub waited: Duration,
}

/// Polls every target until all of them answer 2xx in the same round.
pub struct HealthGate {
    targets: Vec<HealthCheckTarget>,
    poll_interval: Duration,
    timeout: Duration,
}

impl HealthGate {
    pub fn new(targets: Vec<HealthCheckTarget>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            targets,
            poll_interval,
            timeout,
        }
    }

    pub fn targets(&self) -> &[HealthCheckTarget] {
        &self.targets
    }

    /// Block until every target is ready, the timeout elapses, or `cancel` fires.
    /// A round still in flight at the deadline is abandoned.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<GateReport, GateError> {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut ready = vec![false; self.targets.len()];
        let mut rounds = 0u32;

        info!(
            targets = self.targets.len(),
            timeout_s = self.timeout.as_secs(),
            "waiting for services to be healthy"
        );

        loop {
            rounds += 1;

            let round = join_all(self.targets.iter().map(|t| t.check()));
            let results = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GateError::Cancelled),
                results = round => results,
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(self.timed_out(start, &ready));
                }
            };

            for (state, result) in ready.iter_mut().zip(&results) {
                if result.success != *state {
                    if result.success {
                        info!(service = %result.target, status = ?result.status, "service ready");
                    } else {
                        info!(service = %result.target, status = ?result.status, "service no longer ready");
                    }
                }
                *state = result.success;
                if !result.success {
                    debug!(
                        service = %result.target,
                        status = ?result.status,
                        error = result.error.as_deref().unwrap_or(""),
                        "health probe not ready"
                    );
                }
            }

            if ready.iter().all(|r| *r) {
                let waited = start.elapsed();
                info!(rounds, waited_ms = waited.as_millis() as u64, "all services are healthy");
                return Ok(GateReport { rounds, waited });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timed_out(start, &ready));
            }

            debug!(retry_in_ms = self.poll_interval.as_millis() as u64, "services not ready yet");
            let wake = (now + self.poll_interval).min(deadline);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GateError::Cancelled),
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    fn timed_out(&self, start: Instant, ready: &[bool]) -> GateError {
        let not_ready = self
            .targets
            .iter()
            .zip(ready)
            .filter(|(_, r)| !**r)
            .map(|(t, _)| t.name.clone())
            .collect();
        let err = GateError::Timeout {
            waited: start.elapsed(),
            not_ready,
        };
        error!(error = %err, "health gate timed out");
        err
    }
}
