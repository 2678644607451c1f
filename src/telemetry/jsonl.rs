//! Reporter that appends one JSON object per event/summary to a file.
//!
//! Each line carries a `record` tag (`test_event`, `run_summary`,
//! `discovery_error`) followed by the record's own fields, so a dashboard
//! can tail the file without knowing anything about the runner.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use super::{RunSummary, TelemetryReporter, TestEvent};

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum Record<'a> {
    TestEvent(&'a TestEvent),
    RunSummary(&'a RunSummary),
    DiscoveryError { message: &'a str },
}

pub struct JsonLinesReporter {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesReporter {
    /// Open (or create) `path` in append mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("failed to open telemetry file {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, record: Record<'_>) {
        let mut line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialize telemetry record");
                return;
            }
        };
        line.push('\n');

        let mut file = self.file.lock().await;
        if let Err(e) = file.write_all(line.as_bytes()).await {
            warn!(path = %self.path.display(), error = %e, "failed to write telemetry record");
            return;
        }
        if let Err(e) = file.flush().await {
            warn!(path = %self.path.display(), error = %e, "failed to flush telemetry file");
        }
    }
}

#[async_trait::async_trait]
impl TelemetryReporter for JsonLinesReporter {
    async fn report_test_event(&self, event: &TestEvent) {
        self.write(Record::TestEvent(event)).await;
    }

    async fn report_run_summary(&self, summary: &RunSummary) {
        self.write(Record::RunSummary(summary)).await;
    }

    async fn report_discovery_error(&self, message: &str) {
        self.write(Record::DiscoveryError { message }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RunMode;
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_records_are_appended_one_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");
        let reporter = JsonLinesReporter::open(&path).await.unwrap();

        reporter
            .report_test_event(&TestEvent::started("Suite.Case", Some("abc"), None))
            .await;
        reporter
            .report_run_summary(&RunSummary {
                run_id: "abc".to_string(),
                run_number: 1,
                mode: RunMode::Batch,
                total: 1,
                passed: 1,
                failed: 0,
                skipped: 0,
                duration: Duration::from_millis(250),
                failed_tests: Vec::new(),
                success: true,
                cancelled: false,
                started_at: Utc::now(),
                finished_at: Utc::now(),
                next_run_at: None,
            })
            .await;
        reporter.report_discovery_error("registry broken").await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["record"], "test_event");
        assert_eq!(lines[0]["test_name"], "Suite.Case");
        assert_eq!(lines[1]["record"], "run_summary");
        assert_eq!(lines[1]["mode"], "batch");
        assert_eq!(lines[1]["duration_ms"], 250.0);
        assert_eq!(lines[2]["record"], "discovery_error");
        assert_eq!(lines[2]["message"], "registry broken");
    }
}
