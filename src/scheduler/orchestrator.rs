//! Executes one full catalog and aggregates it into a [`RunSummary`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::field::Empty;
use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use super::SchedulerOptions;
use crate::harness::{discover, Executor, RegistryLoader, RunScope, TestCase, TestCaseResult};
use crate::telemetry::{RunMode, RunSummary, TelemetryReporter, TEST_TYPE};

pub struct RunOrchestrator {
    loader: RegistryLoader,
    executor: Arc<Executor>,
    reporter: Arc<dyn TelemetryReporter>,
    options: SchedulerOptions,
}

impl RunOrchestrator {
    pub fn new(
        loader: RegistryLoader,
        executor: Arc<Executor>,
        reporter: Arc<dyn TelemetryReporter>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            loader,
            executor,
            reporter,
            options,
        }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Run the catalog once. `next_interval` is the gap to the following
    /// run, or `None` when this is the last one.
    pub async fn run(
        &self,
        run_number: u32,
        next_interval: Option<Duration>,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let run_id = Uuid::new_v4().simple().to_string();
        let mode = self.options.mode;
        let span = info_span!(
            "e2e.run",
            test.run.id = %run_id,
            test.run.number = run_number,
            test.mode = %mode,
            "test.type" = TEST_TYPE,
            test.total = Empty,
            test.passed = Empty,
            test.failed = Empty,
            test.skipped = Empty,
            test.duration_ms = Empty,
            test.success = Empty,
        );

        async move {
            let started_at = Utc::now();
            let start = Instant::now();
            info!(run = run_number, %mode, "starting test run");

            let (results, cancelled) = self.execute_catalog(&run_id, next_interval, cancel).await;

            let duration = start.elapsed();
            let finished_at = Utc::now();
            let next_run_at = next_interval
                .and_then(|gap| chrono::Duration::from_std(gap).ok())
                .map(|gap| finished_at + gap);
            let summary = summarize(
                run_id.clone(),
                run_number,
                mode,
                &results,
                cancelled,
                duration,
                (started_at, finished_at),
                next_run_at,
            );

            let span = Span::current();
            span.record("test.total", summary.total);
            span.record("test.passed", summary.passed);
            span.record("test.failed", summary.failed);
            span.record("test.skipped", summary.skipped);
            span.record("test.duration_ms", duration.as_secs_f64() * 1000.0);
            span.record("test.success", summary.success);

            self.reporter.report_run_summary(&summary).await;
            summary
        }
        .instrument(span)
        .await
    }

    async fn execute_catalog(
        &self,
        run_id: &str,
        next_interval: Option<Duration>,
        cancel: &CancellationToken,
    ) -> (Vec<TestCaseResult>, bool) {
        if !self.options.initial_delay.is_zero() {
            info!(delay_s = self.options.initial_delay.as_secs_f64(), "waiting before starting test run");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return (Vec::new(), true),
                _ = tokio::time::sleep(self.options.initial_delay) => {}
            }
        }

        let cases = match (self.loader)() {
            Ok(registry) => discover(&registry, &self.options.filters),
            Err(err) => {
                self.reporter.report_discovery_error(&err.to_string()).await;
                Vec::new()
            }
        };

        let scope = RunScope {
            run_id,
            next_run: next_interval
                .and_then(|gap| chrono::Duration::from_std(gap).ok())
                .map(|gap| Utc::now() + gap),
        };

        match self.options.mode {
            RunMode::Batch if self.options.batch_concurrency > 1 => {
                self.run_concurrent(&cases, scope, cancel).await
            }
            RunMode::Batch => self.run_paced(&cases, scope, Duration::ZERO, cancel).await,
            RunMode::Individual => self.run_paced(&cases, scope, self.options.cadence, cancel).await,
        }
    }

    /// One case at a time, sleeping `cadence` between cases.
    async fn run_paced(
        &self,
        cases: &[TestCase],
        scope: RunScope<'_>,
        cadence: Duration,
        cancel: &CancellationToken,
    ) -> (Vec<TestCaseResult>, bool) {
        let mut results = Vec::with_capacity(cases.len());
        for (i, case) in cases.iter().enumerate() {
            if cancel.is_cancelled() {
                return (results, true);
            }
            results.push(self.executor.execute(case, scope).await);

            let Some(next) = cases.get(i + 1) else {
                break;
            };
            if cadence.is_zero() {
                continue;
            }
            if cancel.is_cancelled() {
                return (results, true);
            }
            let next_at = Utc::now()
                + chrono::Duration::from_std(cadence).unwrap_or_else(|_| chrono::Duration::zero());
            info!(
                next = %next.display_name(),
                remaining = cases.len() - i - 1,
                "next test at {}",
                next_at.format("%H:%M:%S")
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return (results, true),
                _ = tokio::time::sleep(cadence) => {}
            }
        }
        (results, cancel.is_cancelled())
    }

    async fn run_concurrent(
        &self,
        cases: &[TestCase],
        scope: RunScope<'_>,
        cancel: &CancellationToken,
    ) -> (Vec<TestCaseResult>, bool) {
        let pending: Vec<BoxFuture<'_, Option<TestCaseResult>>> = cases
            .iter()
            .map(|case| self.execute_unless_cancelled(case, scope, cancel).boxed())
            .collect();
        let results: Vec<Option<TestCaseResult>> = stream::iter(pending)
            .buffer_unordered(self.options.batch_concurrency)
            .collect()
            .await;
        (results.into_iter().flatten().collect(), cancel.is_cancelled())
    }

    async fn execute_unless_cancelled(
        &self,
        case: &TestCase,
        scope: RunScope<'_>,
        cancel: &CancellationToken,
    ) -> Option<TestCaseResult> {
        if cancel.is_cancelled() {
            return None;
        }
        Some(self.executor.execute(case, scope).await)
    }
}

#[allow(clippy::too_many_arguments)]
fn summarize(
    run_id: String,
    run_number: u32,
    mode: RunMode,
    results: &[TestCaseResult],
    cancelled: bool,
    duration: Duration,
    (started_at, finished_at): (chrono::DateTime<Utc>, chrono::DateTime<Utc>),
    next_run_at: Option<chrono::DateTime<Utc>>,
) -> RunSummary {
    let passed = results.iter().filter(|r| r.success).count();
    let skipped = results.iter().filter(|r| r.skipped).count();
    let failed_tests: Vec<String> = results
        .iter()
        .filter(|r| !r.success && !r.skipped)
        .map(|r| r.name.clone())
        .collect();
    let failed = failed_tests.len();

    if cancelled {
        warn!(completed = results.len(), "test run cancelled, reporting partial results");
    }

    RunSummary {
        run_id,
        run_number,
        mode,
        total: results.len(),
        passed,
        failed,
        skipped,
        duration,
        failed_tests,
        success: failed == 0,
        cancelled,
        started_at,
        finished_at,
        next_run_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{DiscoveryError, Fixture, FixtureSpec, Registry, TestArgs, TestContext};
    use crate::telemetry::{JsonLinesReporter, LogReporter, Reporters, TestEventKind};
    use crate::testing::{capture_logs, RecordingReporter};
    use futures::FutureExt;
    use std::sync::Mutex;

    /// Records the (paused) instant every body starts.
    struct Clocked {
        starts: Arc<Mutex<Vec<Instant>>>,
    }

    impl Fixture for Clocked {}

    impl Clocked {
        async fn tick(&self) -> anyhow::Result<()> {
            self.starts.lock().unwrap().push(Instant::now());
            Ok(())
        }

        async fn expect_even(&self, args: &TestArgs) -> anyhow::Result<()> {
            self.starts.lock().unwrap().push(Instant::now());
            let n = args.get(0).and_then(|v| v.as_i64()).unwrap_or(1);
            anyhow::ensure!(n % 2 == 0, "{} is odd", n);
            Ok(())
        }
    }

    struct Setup {
        orchestrator: RunOrchestrator,
        reporter: Arc<RecordingReporter>,
        starts: Arc<Mutex<Vec<Instant>>>,
    }

    fn setup(options: SchedulerOptions, cancel: &CancellationToken) -> Setup {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let factory_starts = starts.clone();
        let loader: RegistryLoader = Arc::new(move || -> Result<Registry, DiscoveryError> {
            let starts = factory_starts.clone();
            let mut registry = Registry::new();
            registry.add(
                FixtureSpec::new("Clocked", move |_| Ok(Clocked { starts: starts.clone() }))
                    .test("A", |f, _| f.tick().boxed())
                    .test("B", |f, _| f.tick().boxed())
                    .theory(
                        "Even",
                        vec![crate::args![2], crate::args![3], crate::args![4]],
                        |f, a| f.expect_even(a).boxed(),
                    )
                    .theory("Empty", Vec::new(), |f, a| f.expect_even(a).boxed()),
            )?;
            Ok(registry)
        });
        let reporter = Arc::new(RecordingReporter::default());
        let executor = Arc::new(Executor::new(
            TestContext::new(Vec::new(), cancel.clone()),
            reporter.clone(),
        ));
        Setup {
            orchestrator: RunOrchestrator::new(loader, executor, reporter.clone(), options),
            reporter,
            starts,
        }
    }

    fn batch() -> SchedulerOptions {
        SchedulerOptions {
            mode: RunMode::Batch,
            ..SchedulerOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_run_aggregates_every_case() {
        let cancel = CancellationToken::new();
        let s = setup(batch(), &cancel);

        let summary = s.orchestrator.run(1, Some(Duration::from_secs(60)), &cancel).await;

        assert_eq!(summary.total, 6);
        assert_eq!(summary.passed, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed_tests, vec!["Clocked.Even(3)".to_string()]);
        assert!(!summary.success);
        assert!(!summary.cancelled);
        assert_eq!(summary.run_id.len(), 32);
        assert!(summary.next_run_at.is_some());
        assert_eq!(s.reporter.summaries().len(), 1);
        // started + finished for the five executed cases, one skip event
        let events = s.reporter.events();
        assert_eq!(events.len(), 11);
        let skipped: Vec<_> = events
            .iter()
            .filter(|e| e.kind == TestEventKind::Skipped)
            .collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].test_name, "Clocked.Empty");
        assert!(skipped[0].skip_reason.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_batch_collects_all_results() {
        let cancel = CancellationToken::new();
        let s = setup(
            SchedulerOptions {
                batch_concurrency: 4,
                ..batch()
            },
            &cancel,
        );

        // the run future must be spawnable onto the runtime
        let orchestrator = s.orchestrator;
        let summary = tokio::spawn(async move { orchestrator.run(1, None, &cancel).await })
            .await
            .unwrap();

        assert_eq!(summary.total, 6);
        assert_eq!(summary.passed, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert!(summary.next_run_at.is_none());
        assert_eq!(s.starts.lock().unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_individual_mode_spaces_cases_by_cadence() {
        let cancel = CancellationToken::new();
        let s = setup(
            SchedulerOptions {
                mode: RunMode::Individual,
                cadence: Duration::from_secs(5),
                filters: vec!["Clocked.A".into(), "Clocked.B".into()],
                ..SchedulerOptions::default()
            },
            &cancel,
        );

        let begin = Instant::now();
        let summary = s.orchestrator.run(1, None, &cancel).await;

        assert_eq!(summary.total, 2);
        assert!(summary.success);
        let starts = s.starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 2);
        assert!(starts[1] - starts[0] >= Duration::from_secs(5));
        // no trailing sleep after the last case
        assert!(begin.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_cadence_returns_partial_results() {
        let cancel = CancellationToken::new();
        let s = setup(
            SchedulerOptions {
                mode: RunMode::Individual,
                cadence: Duration::from_secs(10),
                ..SchedulerOptions::default()
            },
            &cancel,
        );
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            trigger.cancel();
        });

        let summary = s.orchestrator.run(1, None, &cancel).await;

        assert!(summary.cancelled);
        assert_eq!(summary.total, 2);
        assert_eq!(s.starts.lock().unwrap().len(), 2);
        assert_eq!(s.reporter.summaries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_delay_is_honoured_once() {
        let cancel = CancellationToken::new();
        let s = setup(
            SchedulerOptions {
                initial_delay: Duration::from_secs(30),
                filters: vec!["clocked.a".into()],
                ..batch()
            },
            &cancel,
        );

        let begin = Instant::now();
        s.orchestrator.run(1, None, &cancel).await;
        let starts = s.starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 1);
        assert!(starts[0] - begin >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_discovery_error_runs_empty_catalog() {
        let cancel = CancellationToken::new();
        let loader: RegistryLoader = Arc::new(|| -> Result<Registry, DiscoveryError> {
            Err(DiscoveryError::DuplicateFixture("Clocked".into()))
        });
        let reporter = Arc::new(RecordingReporter::default());
        let executor = Arc::new(Executor::new(
            TestContext::new(Vec::new(), cancel.clone()),
            reporter.clone(),
        ));
        let orchestrator = RunOrchestrator::new(loader, executor, reporter.clone(), batch());

        let summary = orchestrator.run(1, None, &cancel).await;

        assert_eq!(summary.total, 0);
        assert!(summary.success);
        let errors = reporter.discovery_errors.lock().unwrap().clone();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Clocked"));
    }

    #[tokio::test]
    async fn test_discovery_error_is_logged_once() {
        let cancel = CancellationToken::new();
        let dir = tempfile::tempdir().unwrap();
        let loader: RegistryLoader = Arc::new(|| -> Result<Registry, DiscoveryError> {
            Err(DiscoveryError::DuplicateFixture("Clocked".into()))
        });
        let reporter: Arc<dyn TelemetryReporter> = Arc::new(
            Reporters::new()
                .with(Arc::new(LogReporter))
                .with(Arc::new(
                    JsonLinesReporter::open(&dir.path().join("events.jsonl")).await.unwrap(),
                )),
        );
        let executor = Arc::new(Executor::new(
            TestContext::new(Vec::new(), cancel.clone()),
            reporter.clone(),
        ));
        let orchestrator = RunOrchestrator::new(loader, executor, reporter, batch());

        let (logs, guard) = capture_logs();
        orchestrator.run(1, None, &cancel).await;
        drop(guard);

        let output = logs.contents();
        assert_eq!(output.matches("test discovery failed").count(), 1, "{output}");
        assert!(output.contains("Clocked"));
    }
}
