//! Fakes shared by unit tests.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tracing::subscriber::DefaultGuard;

use crate::probes::{Probe, ProbeResponse};
use crate::telemetry::{RunSummary, TelemetryReporter, TestEvent};

/// Probe that answers from a script, then repeats `fallback` forever.
pub struct ScriptedProbe {
    script: Mutex<VecDeque<Option<u16>>>,
    fallback: Option<u16>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    /// `None` in the script stands for a transport error.
    pub fn new(script: Vec<Option<u16>>, fallback: Option<u16>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(status: u16) -> Self {
        Self::new(Vec::new(), Some(status))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Probe for ScriptedProbe {
    async fn get(&self, _path: &str) -> Result<ProbeResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        match next {
            Some(status) => Ok(ProbeResponse { status }),
            None => Err(anyhow::anyhow!("connection refused")),
        }
    }
}

/// Health endpoint that does not answer for an hour.
pub struct SilentService;

#[async_trait::async_trait]
impl Probe for SilentService {
    async fn get(&self, _path: &str) -> Result<ProbeResponse> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ProbeResponse { status: 200 })
    }
}

/// Reporter that keeps everything it is given.
#[derive(Default)]
pub struct RecordingReporter {
    pub events: Mutex<Vec<TestEvent>>,
    pub summaries: Mutex<Vec<RunSummary>>,
    pub discovery_errors: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<TestEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn summaries(&self) -> Vec<RunSummary> {
        self.summaries.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TelemetryReporter for RecordingReporter {
    async fn report_test_event(&self, event: &TestEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    async fn report_run_summary(&self, summary: &RunSummary) {
        self.summaries.lock().unwrap().push(summary.clone());
    }

    async fn report_discovery_error(&self, message: &str) {
        self.discovery_errors.lock().unwrap().push(message.to_string());
    }
}

/// Log lines written while a [`capture_logs`] guard is held.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route this thread's `tracing` output into a buffer until the guard drops.
pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}
