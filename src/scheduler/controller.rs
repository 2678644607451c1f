//! The schedule state machine.
//!
//! ```text
//! Idle -> WaitingForHealth -> Running | Scheduled
//! Scheduled -> Running -> Scheduled | Stopped(MaxRunsReached)
//! WaitingForHealth -> Stopped(GateTimeout)
//! any -> Cancelled
//! ```
//!
//! A stop keeps health pings going, so a controller that used up its run
//! budget still ends in `Cancelled`; the report keeps the stop reason.
//!
//! Runs are only ever triggered from this loop, so at most one is in flight.
//! The run counter and the last-run instant live here and nowhere else.

use std::fmt;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{RunOrchestrator, SchedulerOptions};
use crate::health::{GateError, HealthGate, HealthMonitor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    GateTimeout,
    MaxRunsReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    WaitingForHealth,
    Scheduled,
    Running,
    Stopped(StopReason),
    Cancelled,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerState::Idle => write!(f, "idle"),
            ControllerState::WaitingForHealth => write!(f, "waiting_for_health"),
            ControllerState::Scheduled => write!(f, "scheduled"),
            ControllerState::Running => write!(f, "running"),
            ControllerState::Stopped(StopReason::GateTimeout) => write!(f, "stopped(gate_timeout)"),
            ControllerState::Stopped(StopReason::MaxRunsReached) => write!(f, "stopped(max_runs)"),
            ControllerState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of a controller lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerReport {
    pub runs_completed: u32,
    pub final_state: ControllerState,
    /// Why runs stopped before cancellation, if they did.
    pub stop_reason: Option<StopReason>,
    pub gate_failed: bool,
    /// Every state entered, in order.
    pub transitions: Vec<ControllerState>,
}

pub struct ScheduleController {
    gate: HealthGate,
    monitor: Option<HealthMonitor>,
    orchestrator: RunOrchestrator,
    options: SchedulerOptions,
    tick: Duration,
    state: ControllerState,
    transitions: Vec<ControllerState>,
    stop_reason: Option<StopReason>,
    runs_completed: u32,
    last_run: Instant,
}

impl ScheduleController {
    /// `tick` is how often the loop checks whether a run is due.
    pub fn new(gate: HealthGate, orchestrator: RunOrchestrator, tick: Duration) -> Self {
        let options = orchestrator.options().clone();
        Self {
            gate,
            monitor: None,
            orchestrator,
            options,
            tick,
            state: ControllerState::Idle,
            transitions: vec![ControllerState::Idle],
            stop_reason: None,
            runs_completed: 0,
            last_run: Instant::now(),
        }
    }

    /// Health monitor to start once the gate opens.
    pub fn with_monitor(mut self, monitor: HealthMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    fn transition(&mut self, next: ControllerState) {
        if let ControllerState::Stopped(reason) = next {
            self.stop_reason = Some(reason);
        }
        if self.state != next {
            debug!(from = %self.state, to = %next, "controller state change");
            self.state = next;
            self.transitions.push(next);
        }
    }

    fn report(self) -> ControllerReport {
        ControllerReport {
            runs_completed: self.runs_completed,
            final_state: self.state,
            stop_reason: self.stop_reason,
            gate_failed: self.stop_reason == Some(StopReason::GateTimeout),
            transitions: self.transitions,
        }
    }

    /// Drive the schedule until cancelled, or until the health gate fails.
    pub async fn run(mut self, cancel: CancellationToken) -> ControllerReport {
        info!(
            interval_s = self.options.interval.as_secs(),
            max_runs = ?self.options.max_runs,
            run_on_startup = self.options.run_on_startup,
            mode = %self.options.mode,
            targets = self.gate.targets().len(),
            "starting test scheduler"
        );

        self.transition(ControllerState::WaitingForHealth);
        match self.gate.wait(&cancel).await {
            Ok(report) => debug!(rounds = report.rounds, "health gate open"),
            Err(GateError::Cancelled) => {
                self.transition(ControllerState::Cancelled);
                return self.report();
            }
            Err(err) => {
                error!(error = %err, "services never became healthy, no test runs will start");
                self.transition(ControllerState::Stopped(StopReason::GateTimeout));
                return self.report();
            }
        }

        let monitor = self.monitor.take().map(|m| m.spawn(cancel.clone()));

        self.last_run = Instant::now();
        if self.options.budget_exhausted(0) {
            info!("run budget is zero, continuing with health pings only");
            self.transition(ControllerState::Stopped(StopReason::MaxRunsReached));
        } else if self.options.run_on_startup {
            info!("running initial test suite");
            self.run_once(&cancel).await;
        } else {
            self.transition(ControllerState::Scheduled);
        }

        info!(
            interval_s = self.options.interval.as_secs(),
            tick_s = self.tick.as_secs_f64(),
            "scheduled test runs"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.stop_reason.is_some() {
                continue;
            }
            if self.last_run.elapsed() < self.options.interval {
                continue;
            }
            info!(run = self.runs_completed + 1, "running scheduled test suite");
            self.run_once(&cancel).await;
        }

        self.transition(ControllerState::Cancelled);
        info!("cancellation requested, stopping");

        if let Some(handle) = monitor {
            let _ = handle.await;
        }

        info!(total_runs = self.runs_completed, "runner exited cleanly");
        self.report()
    }

    async fn run_once(&mut self, cancel: &CancellationToken) {
        self.transition(ControllerState::Running);
        self.runs_completed += 1;
        let last = self.options.budget_exhausted(self.runs_completed);
        let next_interval = (!last).then_some(self.options.interval);

        let summary = self
            .orchestrator
            .run(self.runs_completed, next_interval, cancel)
            .await;

        self.last_run = Instant::now();
        if last {
            info!(
                max_runs = self.runs_completed,
                "reached maximum test runs, continuing with health pings only"
            );
            self.transition(ControllerState::Stopped(StopReason::MaxRunsReached));
        } else {
            if let Some(next) = summary.next_run_at {
                info!("next test run scheduled at {}", next.format("%H:%M:%S"));
            }
            self.transition(ControllerState::Scheduled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{DiscoveryError, Executor, Fixture, FixtureSpec, Registry, RegistryLoader, TestContext};
    use crate::probes::HealthCheckTarget;
    use crate::telemetry::RunMode;
    use crate::testing::{RecordingReporter, ScriptedProbe};
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Smoke {
        runs: Arc<AtomicUsize>,
    }

    impl Fixture for Smoke {}

    impl Smoke {
        async fn ok(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Setup {
        controller: ScheduleController,
        reporter: Arc<RecordingReporter>,
        bodies: Arc<AtomicUsize>,
        gate_probe: Arc<ScriptedProbe>,
        monitor_probe: Arc<ScriptedProbe>,
    }

    fn setup(options: SchedulerOptions, gate_probe: ScriptedProbe, cancel: &CancellationToken) -> Setup {
        let bodies = Arc::new(AtomicUsize::new(0));
        let loader_bodies = bodies.clone();
        let loader: RegistryLoader = Arc::new(move || -> Result<Registry, DiscoveryError> {
            let runs = loader_bodies.clone();
            let mut registry = Registry::new();
            registry.add(
                FixtureSpec::new("Smoke", move |_| Ok(Smoke { runs: runs.clone() }))
                    .test("Ok", |f, _| f.ok().boxed()),
            )?;
            Ok(registry)
        });

        let reporter = Arc::new(RecordingReporter::default());
        let executor = Arc::new(Executor::new(
            TestContext::new(Vec::new(), cancel.clone()),
            reporter.clone(),
        ));
        let orchestrator = RunOrchestrator::new(loader, executor, reporter.clone(), options);

        let gate_probe = Arc::new(gate_probe);
        let monitor_probe = Arc::new(ScriptedProbe::always(200));
        let gate = HealthGate::new(
            vec![HealthCheckTarget::new("api", "/health", gate_probe.clone())],
            Duration::from_secs(2),
            Duration::from_secs(120),
        );
        let monitor = HealthMonitor::new(
            vec![HealthCheckTarget::new("gateway", "/health", monitor_probe.clone())],
            Duration::from_secs(5),
        );

        Setup {
            controller: ScheduleController::new(gate, orchestrator, Duration::from_secs(5))
                .with_monitor(monitor),
            reporter,
            bodies,
            gate_probe,
            monitor_probe,
        }
    }

    fn options(max_runs: Option<u32>, run_on_startup: bool) -> SchedulerOptions {
        SchedulerOptions {
            interval: Duration::from_secs(60),
            max_runs,
            run_on_startup,
            mode: RunMode::Batch,
            ..SchedulerOptions::default()
        }
    }

    fn cancel_after(cancel: &CancellationToken, after: Duration) {
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            trigger.cancel();
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_budget_stops_runs_but_not_pings() {
        let cancel = CancellationToken::new();
        let s = setup(options(Some(2), true), ScriptedProbe::always(200), &cancel);
        cancel_after(&cancel, Duration::from_secs(300));

        let report = s.controller.run(cancel.clone()).await;

        assert_eq!(report.runs_completed, 2);
        assert_eq!(report.final_state, ControllerState::Cancelled);
        assert_eq!(report.stop_reason, Some(StopReason::MaxRunsReached));
        assert!(report
            .transitions
            .contains(&ControllerState::Stopped(StopReason::MaxRunsReached)));
        assert!(!report.gate_failed);
        assert_eq!(s.bodies.load(Ordering::SeqCst), 2);

        let summaries = s.reporter.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].run_number, 1);
        assert!(summaries[0].next_run_at.is_some());
        assert!(summaries[1].next_run_at.is_none());
        // pings kept going every 5s long after the last run at t=60
        assert!(s.monitor_probe.calls() >= 50, "pings: {}", s.monitor_probe.calls());
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_are_spaced_by_interval() {
        let cancel = CancellationToken::new();
        let s = setup(options(None, false), ScriptedProbe::always(200), &cancel);
        // first run due at t=60, then t=120 and t=180
        cancel_after(&cancel, Duration::from_secs(200));

        let report = s.controller.run(cancel.clone()).await;

        assert_eq!(report.runs_completed, 3);
        assert_eq!(report.final_state, ControllerState::Cancelled);
        assert_eq!(report.stop_reason, None);
        assert_eq!(
            &report.transitions[..4],
            &[
                ControllerState::Idle,
                ControllerState::WaitingForHealth,
                ControllerState::Scheduled,
                ControllerState::Running,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_timeout_means_no_runs() {
        let cancel = CancellationToken::new();
        let s = setup(options(None, true), ScriptedProbe::always(503), &cancel);

        let report = s.controller.run(cancel.clone()).await;

        assert_eq!(report.runs_completed, 0);
        assert!(report.gate_failed);
        assert_eq!(report.final_state, ControllerState::Stopped(StopReason::GateTimeout));
        assert_eq!(report.stop_reason, Some(StopReason::GateTimeout));
        assert!(s.reporter.summaries().is_empty());
        assert_eq!(s.monitor_probe.calls(), 0);
        assert!(s.gate_probe.calls() > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_for_health() {
        let cancel = CancellationToken::new();
        let s = setup(options(None, true), ScriptedProbe::always(503), &cancel);
        cancel_after(&cancel, Duration::from_secs(7));

        let report = s.controller.run(cancel.clone()).await;

        assert_eq!(report.final_state, ControllerState::Cancelled);
        assert!(!report.gate_failed);
        assert_eq!(report.runs_completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_never_runs() {
        let cancel = CancellationToken::new();
        let s = setup(options(Some(0), true), ScriptedProbe::always(200), &cancel);
        cancel_after(&cancel, Duration::from_secs(120));

        let report = s.controller.run(cancel.clone()).await;

        assert_eq!(report.runs_completed, 0);
        assert_eq!(report.final_state, ControllerState::Cancelled);
        assert_eq!(report.stop_reason, Some(StopReason::MaxRunsReached));
    }
}
