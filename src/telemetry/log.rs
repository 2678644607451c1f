//! Reporter that turns telemetry into structured log lines.

use tracing::{error, info, warn};

use super::{RunSummary, TelemetryReporter, TestEvent, TestEventKind, TEST_TYPE};

#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

#[async_trait::async_trait]
impl TelemetryReporter for LogReporter {
    async fn report_test_event(&self, event: &TestEvent) {
        let duration_ms = event.duration.map(|d| d.as_secs_f64() * 1000.0);
        match event.kind {
            TestEventKind::Started => {
                info!(
                    test.name = %event.test_name,
                    "test.type" = TEST_TYPE,
                    test.run.id = event.run_id.as_deref().unwrap_or(""),
                    "test started"
                );
            }
            TestEventKind::Completed => {
                info!(
                    test.name = %event.test_name,
                    test.result = "passed",
                    test.duration_ms = duration_ms.unwrap_or_default(),
                    "test passed"
                );
            }
            TestEventKind::Failed => {
                error!(
                    test.name = %event.test_name,
                    test.result = "failed",
                    test.duration_ms = duration_ms.unwrap_or_default(),
                    test.error.message = event.error_message.as_deref().unwrap_or(""),
                    "test failed"
                );
            }
            TestEventKind::Skipped => {
                info!(
                    test.name = %event.test_name,
                    test.result = "skipped",
                    "test.type" = TEST_TYPE,
                    test.skip_reason = event.skip_reason.as_deref().unwrap_or(""),
                    "test skipped"
                );
            }
        }

        if let Some(next) = event.next_scheduled_run {
            info!(next_run = %next.format("%H:%M:%S"), "next run scheduled");
        }
    }

    async fn report_run_summary(&self, summary: &RunSummary) {
        let next_run = summary
            .next_run_at
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "none".to_string());

        if summary.success {
            info!(
                test.run.id = %summary.run_id,
                run = summary.run_number,
                test.total = summary.total,
                test.passed = summary.passed,
                test.failed = summary.failed,
                test.skipped = summary.skipped,
                "test.duration_ms" = summary.duration.as_secs_f64() * 1000.0,
                next_run = %next_run,
                "test run passed: {}/{} tests",
                summary.passed,
                summary.total
            );
        } else {
            error!(
                test.run.id = %summary.run_id,
                run = summary.run_number,
                test.total = summary.total,
                test.passed = summary.passed,
                test.failed = summary.failed,
                test.skipped = summary.skipped,
                "test.duration_ms" = summary.duration.as_secs_f64() * 1000.0,
                next_run = %next_run,
                "test run failed: {}/{} passed, {} failed",
                summary.passed,
                summary.total,
                summary.failed
            );
            for name in &summary.failed_tests {
                error!(test.name = %name, "  failed");
            }
        }

        if summary.cancelled {
            warn!(test.run.id = %summary.run_id, "run was cancelled before finishing the catalog");
        }
    }

    async fn report_discovery_error(&self, message: &str) {
        error!(error = %message, "test discovery failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::capture_logs;

    #[tokio::test]
    async fn test_skipped_case_is_logged_with_stable_keys() {
        let (logs, guard) = capture_logs();
        LogReporter
            .report_test_event(&TestEvent::skipped("Suite.Theory", Some("abc"), "no theory data"))
            .await;
        drop(guard);

        let output = logs.contents();
        assert!(output.contains("test skipped"), "{output}");
        assert!(output.contains("test.name=Suite.Theory"), "{output}");
        assert!(output.contains("test.result="), "{output}");
        assert!(output.contains("no theory data"), "{output}");
    }
}
