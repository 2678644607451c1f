//! medtrack-e2e: continuous end-to-end testing for the MedicineTrack services.
//!
//! The runner waits for the services to report healthy, then runs the
//! bundled suites on a fixed interval while pinging every service in the
//! background. Each test and each run is reported through the
//! [`telemetry`] sinks.

pub mod cli;
pub mod config;
pub mod harness;
pub mod health;
pub mod probes;
pub mod scheduler;
pub mod suites;
pub mod telemetry;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::E2eConfig;
use crate::harness::{Executor, RegistryLoader, TestContext};
use crate::health::{HealthGate, HealthMonitor};
use crate::probes::{HealthCheckTarget, Probe, ServiceClient};
use crate::scheduler::{ControllerReport, RunOrchestrator, ScheduleController};
use crate::telemetry::{JsonLinesReporter, LogReporter, Reporters, TelemetryReporter};

/// Run the bundled suites until `cancel` fires or the health gate gives up.
pub async fn run(config: E2eConfig, cancel: CancellationToken) -> Result<ControllerReport> {
    run_with_loader(config, suites::loader(), cancel).await
}

/// Like [`run`], with the test catalog supplied by `loader`.
pub async fn run_with_loader(
    config: E2eConfig,
    loader: RegistryLoader,
    cancel: CancellationToken,
) -> Result<ControllerReport> {
    config.validate()?;

    let timeout = config.health.request_timeout();
    let mut clients = Vec::with_capacity(config.services.len());
    let mut gate_targets = Vec::new();
    let mut monitor_targets = Vec::new();

    for service in &config.services {
        let client = Arc::new(ServiceClient::new(&service.name, &service.base_url, timeout)?);
        let probe: Arc<dyn Probe> = client.clone();
        if service.gate {
            gate_targets.push(HealthCheckTarget::new(
                &service.name,
                &service.health_path,
                probe.clone(),
            ));
        }
        if service.monitor {
            monitor_targets.push(HealthCheckTarget::new(
                &service.name,
                &service.health_path,
                probe,
            ));
        }
        clients.push(client);
    }

    let reporter = build_reporter(&config).await?;

    let context = TestContext::new(clients, cancel.clone());
    let executor = Arc::new(
        Executor::new(context, reporter.clone()).strict_lifecycle(config.lifecycle.strict),
    );
    let orchestrator =
        RunOrchestrator::new(loader, executor, reporter, config.scheduler_options());

    let gate = HealthGate::new(
        gate_targets,
        config.health.gate_poll(),
        config.health.gate_timeout(),
    );
    let monitor = HealthMonitor::new(monitor_targets, config.health.monitor_interval());

    let report = ScheduleController::new(gate, orchestrator, config.health.monitor_interval())
        .with_monitor(monitor)
        .run(cancel)
        .await;

    info!(
        runs = report.runs_completed,
        state = %report.final_state,
        "test scheduler finished"
    );
    Ok(report)
}

async fn build_reporter(config: &E2eConfig) -> Result<Arc<dyn TelemetryReporter>> {
    let mut reporters = Reporters::new().with(Arc::new(LogReporter));
    if let Some(path) = &config.telemetry.events_path {
        let jsonl = JsonLinesReporter::open(path)
            .await
            .context("failed to open telemetry events file")?;
        info!(path = %jsonl.path().display(), "writing test events as JSON lines");
        reporters = reporters.with(Arc::new(jsonl));
    }
    Ok(Arc::new(reporters))
}
