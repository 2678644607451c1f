//! Test and run telemetry.
//!
//! Every executed test produces [`TestEvent`]s and every run produces one
//! [`RunSummary`]. Both are handed to a [`TelemetryReporter`]; the reporter
//! decides where they go (structured log lines, a JSON-lines file, or both
//! through [`Reporters`]). Distributed-tracing spans are opened by the
//! executor, orchestrator and monitor themselves with `tracing`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod jsonl;
pub mod log;

pub use self::jsonl::JsonLinesReporter;
pub use self::log::LogReporter;

/// Value of the `test.type` key on every test span and record.
pub const TEST_TYPE: &str = "e2e";

/// Point-in-time notification about a single test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestEventKind {
    Started,
    Completed,
    Failed,
    /// Never executed; `skip_reason` says why.
    Skipped,
}

impl std::fmt::Display for TestEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestEventKind::Started => write!(f, "started"),
            TestEventKind::Completed => write!(f, "completed"),
            TestEventKind::Failed => write!(f, "failed"),
            TestEventKind::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestEvent {
    pub test_name: String,
    pub kind: TestEventKind,
    pub timestamp: DateTime<Utc>,
    pub run_id: Option<String>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_opt_millis")]
    pub duration: Option<Duration>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub next_scheduled_run: Option<DateTime<Utc>>,
}

impl TestEvent {
    pub fn started(
        test_name: &str,
        run_id: Option<&str>,
        next_scheduled_run: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            test_name: test_name.to_string(),
            kind: TestEventKind::Started,
            timestamp: Utc::now(),
            run_id: run_id.map(str::to_string),
            duration: None,
            error_message: None,
            stack_trace: None,
            skip_reason: None,
            next_scheduled_run,
        }
    }

    pub fn completed(test_name: &str, run_id: Option<&str>, duration: Duration) -> Self {
        Self {
            test_name: test_name.to_string(),
            kind: TestEventKind::Completed,
            timestamp: Utc::now(),
            run_id: run_id.map(str::to_string),
            duration: Some(duration),
            error_message: None,
            stack_trace: None,
            skip_reason: None,
            next_scheduled_run: None,
        }
    }

    pub fn failed(
        test_name: &str,
        run_id: Option<&str>,
        duration: Duration,
        message: &str,
        stack_trace: Option<&str>,
    ) -> Self {
        Self {
            test_name: test_name.to_string(),
            kind: TestEventKind::Failed,
            timestamp: Utc::now(),
            run_id: run_id.map(str::to_string),
            duration: Some(duration),
            error_message: Some(message.to_string()),
            stack_trace: stack_trace.map(str::to_string),
            skip_reason: None,
            next_scheduled_run: None,
        }
    }

    pub fn skipped(test_name: &str, run_id: Option<&str>, reason: &str) -> Self {
        Self {
            test_name: test_name.to_string(),
            kind: TestEventKind::Skipped,
            timestamp: Utc::now(),
            run_id: run_id.map(str::to_string),
            duration: None,
            error_message: None,
            stack_trace: None,
            skip_reason: Some(reason.to_string()),
            next_scheduled_run: None,
        }
    }
}

/// How a run walked its catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// All cases back to back.
    Batch,
    /// One case, then a cadence pause, then the next.
    Individual,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Batch => write!(f, "batch"),
            RunMode::Individual => write!(f, "individual"),
        }
    }
}

/// Aggregate result of one complete pass over the test catalog.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub run_number: u32,
    pub mode: RunMode,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub failed_tests: Vec<String>,
    pub success: bool,
    /// Set when the run stopped early on a cancellation request.
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Sink for test and run telemetry.
///
/// Reporting never fails the caller: implementations log their own I/O
/// problems and carry on.
#[async_trait::async_trait]
pub trait TelemetryReporter: Send + Sync {
    async fn report_test_event(&self, event: &TestEvent);

    async fn report_run_summary(&self, summary: &RunSummary);

    /// The test catalog could not be loaded for a run. Ignored by default.
    async fn report_discovery_error(&self, _message: &str) {}
}

/// Fans every report out to several reporters, in order.
#[derive(Clone, Default)]
pub struct Reporters {
    inner: Vec<Arc<dyn TelemetryReporter>>,
}

impl Reporters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: Arc<dyn TelemetryReporter>) -> Self {
        self.inner.push(reporter);
        self
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait::async_trait]
impl TelemetryReporter for Reporters {
    async fn report_test_event(&self, event: &TestEvent) {
        for reporter in &self.inner {
            reporter.report_test_event(event).await;
        }
    }

    async fn report_run_summary(&self, summary: &RunSummary) {
        for reporter in &self.inner {
            reporter.report_run_summary(summary).await;
        }
    }

    async fn report_discovery_error(&self, message: &str) {
        for reporter in &self.inner {
            reporter.report_discovery_error(message).await;
        }
    }
}

pub(crate) fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

fn serialize_opt_millis<S: serde::Serializer>(
    d: &Option<Duration>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_some(&(d.as_secs_f64() * 1000.0)),
        None => s.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Counting {
        events: Mutex<Vec<TestEventKind>>,
        summaries: Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl TelemetryReporter for Counting {
        async fn report_test_event(&self, event: &TestEvent) {
            self.events.lock().unwrap().push(event.kind);
        }
        async fn report_run_summary(&self, _summary: &RunSummary) {
            *self.summaries.lock().unwrap() += 1;
        }
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_reporter() {
        let a = Arc::new(Counting::default());
        let b = Arc::new(Counting::default());
        let reporters = Reporters::new().with(a.clone()).with(b.clone());
        assert_eq!(reporters.len(), 2);

        reporters
            .report_test_event(&TestEvent::started("A.b", Some("run"), None))
            .await;
        reporters
            .report_test_event(&TestEvent::completed("A.b", Some("run"), Duration::from_millis(5)))
            .await;

        assert_eq!(*a.events.lock().unwrap(), vec![TestEventKind::Started, TestEventKind::Completed]);
        assert_eq!(*b.events.lock().unwrap(), vec![TestEventKind::Started, TestEventKind::Completed]);
    }

    #[test]
    fn test_event_serializes_duration_as_millis() {
        let event = TestEvent::failed("A.b", None, Duration::from_millis(1500), "boom", None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "failed");
        assert_eq!(json["duration_ms"], 1500.0);
        assert_eq!(json["error_message"], "boom");
        assert!(json.get("skip_reason").is_none());
    }

    #[test]
    fn test_skipped_event_names_the_reason() {
        let event = TestEvent::skipped("A.b", Some("run"), "no theory data");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "skipped");
        assert_eq!(json["test_name"], "A.b");
        assert_eq!(json["skip_reason"], "no theory data");
        assert!(json["duration_ms"].is_null());
    }
}
