//! Always-on health pings, independent of the test-run cadence.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::field::Empty;
use tracing::{info, info_span, warn, Instrument};

use crate::probes::{HealthCheckTarget, ProbeResult};

pub struct HealthMonitor {
    targets: Vec<HealthCheckTarget>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(targets: Vec<HealthCheckTarget>, interval: Duration) -> Self {
        Self { targets, interval }
    }

    /// Run the ping loop on its own task until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            targets = self.targets.len(),
            interval_s = self.interval.as_secs_f64(),
            "health monitor started"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.ping_all(&cancel);
                }
            }
        }

        info!("health monitor stopped");
    }

    /// Fire one probe per target. Each probe is its own task, so a slow
    /// service never delays the others.
    pub fn ping_all(&self, cancel: &CancellationToken) -> Vec<JoinHandle<Option<ProbeResult>>> {
        self.targets
            .iter()
            .cloned()
            .map(|target| tokio::spawn(ping(target, cancel.clone())))
            .collect()
    }
}

/// Probe one target under a fresh root span. Returns `None` if cancelled mid-flight.
pub async fn ping(target: HealthCheckTarget, cancel: CancellationToken) -> Option<ProbeResult> {
    let span = info_span!(
        parent: None,
        "e2e.health_ping",
        test.name = %format!("ping_{}", target.name),
        test.target = %target.name,
        test.endpoint = %target.path,
        "test.type" = "health-check",
        http.status_code = Empty,
        test.duration_ms = Empty,
        outcome = Empty,
        otel.status_code = Empty,
    );

    async move {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = target.check() => result,
        };

        let span = tracing::Span::current();
        let duration_ms = result.latency.as_secs_f64() * 1000.0;
        span.record("test.duration_ms", duration_ms);
        if let Some(status) = result.status {
            span.record("http.status_code", status);
        }

        if result.success {
            span.record("outcome", "ok");
            span.record("otel.status_code", "OK");
            info!(service = %target.name, duration_ms, "health check OK");
        } else {
            span.record("outcome", "failed");
            span.record("otel.status_code", "ERROR");
            match (&result.status, &result.error) {
                (Some(status), _) => {
                    warn!(service = %target.name, endpoint = %target.endpoint(), status, "health check failed")
                }
                (None, error) => warn!(
                    service = %target.name,
                    endpoint = %target.endpoint(),
                    error = error.as_deref().unwrap_or("unknown"),
                    "health ping failed"
                ),
            }
        }

        Some(result)
    }
    .instrument(span)
    .await
}
