//! Runs one test case through its fixture lifecycle.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::time::Instant;
use tracing::field::Empty;
use tracing::{debug, info_span, warn, Instrument, Span};

use super::assert::AssertionError;
use super::{TestCase, TestContext};
use crate::telemetry::{TelemetryReporter, TestEvent, TEST_TYPE};

/// Why a case failed, keeping the error the body raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestFailure {
    pub message: String,
    /// Short classification: `assertion`, `http`, `panic`, `cancelled`,
    /// `fixture`, `lifecycle` or `error`.
    pub error_type: String,
    /// Full error chain, when there is one.
    pub detail: Option<String>,
}

impl TestFailure {
    pub fn from_error(err: &anyhow::Error) -> Self {
        let error_type = if err.chain().any(|e| e.is::<AssertionError>()) {
            "assertion"
        } else if err.chain().any(|e| e.is::<reqwest::Error>()) {
            "http"
        } else {
            "error"
        };
        Self {
            message: err.to_string(),
            error_type: error_type.to_string(),
            detail: Some(format!("{:?}", err)),
        }
    }

    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "test panicked".to_string()
        };
        Self {
            message,
            error_type: "panic".to_string(),
            detail: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            message: "cancelled".to_string(),
            error_type: "cancelled".to_string(),
            detail: None,
        }
    }

    fn with_type(err: &anyhow::Error, error_type: &str) -> Self {
        Self {
            error_type: error_type.to_string(),
            ..Self::from_error(err)
        }
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error_type, self.message)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestCaseResult {
    pub name: String,
    pub success: bool,
    pub skipped: bool,
    #[serde(rename = "duration_ms", serialize_with = "crate::telemetry::serialize_millis")]
    pub duration: Duration,
    pub skip_reason: Option<String>,
    pub failure: Option<TestFailure>,
}

impl TestCaseResult {
    fn passed(name: &str, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            skipped: false,
            duration,
            skip_reason: None,
            failure: None,
        }
    }

    fn failed(name: &str, duration: Duration, failure: TestFailure) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            skipped: false,
            duration,
            skip_reason: None,
            failure: Some(failure),
        }
    }

    fn skipped(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            skipped: true,
            duration: Duration::ZERO,
            skip_reason: Some(reason.to_string()),
            failure: None,
        }
    }

    /// `passed`, `failed` or `skipped`.
    pub fn outcome(&self) -> &'static str {
        if self.skipped {
            "skipped"
        } else if self.success {
            "passed"
        } else {
            "failed"
        }
    }
}

/// Run-level identifiers attached to every event of a case.
#[derive(Debug, Clone, Copy)]
pub struct RunScope<'a> {
    pub run_id: &'a str,
    pub next_run: Option<DateTime<Utc>>,
}

pub struct Executor {
    context: TestContext,
    reporter: Arc<dyn TelemetryReporter>,
    strict_lifecycle: bool,
}

impl Executor {
    pub fn new(context: TestContext, reporter: Arc<dyn TelemetryReporter>) -> Self {
        Self {
            context,
            reporter,
            strict_lifecycle: false,
        }
    }

    /// Treat initialize/dispose faults as test failures.
    pub fn strict_lifecycle(mut self, strict: bool) -> Self {
        self.strict_lifecycle = strict;
        self
    }

    pub fn context(&self) -> &TestContext {
        &self.context
    }

    /// Execute one case. Always produces a result; never propagates a fault.
    pub async fn execute(&self, case: &TestCase, scope: RunScope<'_>) -> TestCaseResult {
        let span = info_span!(
            "e2e.test",
            test.name = %case.display_name(),
            "test.type" = TEST_TYPE,
            test.fixture = %case.fixture_name(),
            test.method = %case.method_name(),
            test.run.id = %scope.run_id,
            test.result = Empty,
            test.duration_ms = Empty,
            test.error.message = Empty,
            "test.error.type" = Empty,
            otel.status_code = Empty,
        );

        async move {
            let result = match case.skip_reason() {
                Some(reason) => {
                    self.reporter
                        .report_test_event(&TestEvent::skipped(
                            case.display_name(),
                            Some(scope.run_id),
                            reason,
                        ))
                        .await;
                    TestCaseResult::skipped(case.display_name(), reason)
                }
                None => self.run_case(case, scope).await,
            };

            let span = Span::current();
            span.record("test.result", result.outcome());
            span.record("test.duration_ms", result.duration.as_secs_f64() * 1000.0);
            if let Some(failure) = &result.failure {
                span.record("test.error.message", failure.message.as_str());
                span.record("test.error.type", failure.error_type.as_str());
                span.record("otel.status_code", "ERROR");
            } else if result.success {
                span.record("otel.status_code", "OK");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_case(&self, case: &TestCase, scope: RunScope<'_>) -> TestCaseResult {
        let name = case.display_name();
        let run_id = Some(scope.run_id);
        self.reporter
            .report_test_event(&TestEvent::started(name, run_id, scope.next_run))
            .await;
        debug!(test.name = %name, "constructing fixture");

        let mut instance = match case.fixture().construct(&self.context) {
            Ok(instance) => instance,
            Err(err) => {
                let failure = TestFailure::with_type(&err, "fixture");
                return self.finish(name, scope, Duration::ZERO, Err(failure)).await;
            }
        };

        let mut init_fault = None;
        if let Err(err) = instance.initialize().await {
            warn!(test.name = %name, error = %err, "fixture initialize failed");
            if self.strict_lifecycle {
                init_fault = Some(TestFailure::with_type(&err, "lifecycle"));
            }
        }

        let start = Instant::now();
        let mut outcome = match init_fault {
            Some(failure) => Err(failure),
            None => {
                let body = AssertUnwindSafe(instance.invoke(case.method_index(), case.args())).catch_unwind();
                tokio::select! {
                    biased;
                    _ = self.context.cancellation().cancelled() => Err(TestFailure::cancelled()),
                    res = body => match res {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(err)) => Err(TestFailure::from_error(&err)),
                        Err(payload) => Err(TestFailure::from_panic(payload)),
                    },
                }
            }
        };
        let elapsed = start.elapsed();

        if let Err(err) = instance.dispose().await {
            warn!(test.name = %name, error = %err, "fixture dispose failed");
            if self.strict_lifecycle && outcome.is_ok() {
                outcome = Err(TestFailure::with_type(&err, "lifecycle"));
            }
        }

        self.finish(name, scope, elapsed, outcome).await
    }

    async fn finish(
        &self,
        name: &str,
        scope: RunScope<'_>,
        elapsed: Duration,
        outcome: Result<(), TestFailure>,
    ) -> TestCaseResult {
        let run_id = Some(scope.run_id);
        match outcome {
            Ok(()) => {
                debug!(test.name = %name, test.duration_ms = elapsed.as_millis() as u64, "test body returned");
                self.reporter
                    .report_test_event(&TestEvent::completed(name, run_id, elapsed))
                    .await;
                TestCaseResult::passed(name, elapsed)
            }
            Err(failure) => {
                debug!(
                    test.name = %name,
                    test.duration_ms = elapsed.as_millis() as u64,
                    "test.error.type" = %failure.error_type,
                    "test body failed"
                );
                self.reporter
                    .report_test_event(&TestEvent::failed(
                        name,
                        run_id,
                        elapsed,
                        &failure.message,
                        failure.detail.as_deref(),
                    ))
                    .await;
                TestCaseResult::failed(name, elapsed, failure)
            }
        }
    }
}
