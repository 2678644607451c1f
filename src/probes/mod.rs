use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod http;

pub use self::http::ServiceClient;

/// Raw answer to a probe request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResponse {
    pub status: u16,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for anything that can issue a health request against a service.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    /// `GET path` against the service.
    /// Any HTTP status is `Ok`; only transport failures are errors.
    async fn get(&self, path: &str) -> Result<ProbeResponse>;

    /// Where requests go, for log lines.
    fn endpoint(&self, path: &str) -> String {
        path.to_string()
    }
}

/// Outcome of checking one target once.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub target: String,
    pub path: String,
    pub status: Option<u16>,
    pub latency: Duration,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A named service, the client used to reach it, and the path to probe.
#[derive(Clone)]
pub struct HealthCheckTarget {
    pub name: String,
    pub path: String,
    probe: Arc<dyn Probe>,
}

impl std::fmt::Debug for HealthCheckTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckTarget")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

impl HealthCheckTarget {
    pub fn new(name: impl Into<String>, path: impl Into<String>, probe: Arc<dyn Probe>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            probe,
        }
    }

    pub fn endpoint(&self) -> String {
        self.probe.endpoint(&self.path)
    }

    /// Probe once. 2xx is ready; any other status or a transport error is not.
    pub async fn check(&self) -> ProbeResult {
        let start = Instant::now();
        let result = self.probe.get(&self.path).await;
        let latency = start.elapsed();
        let timestamp = Utc::now();

        match result {
            Ok(resp) => ProbeResult {
                target: self.name.clone(),
                path: self.path.clone(),
                status: Some(resp.status),
                latency,
                success: resp.is_success(),
                error: None,
                timestamp,
            },
            Err(e) => ProbeResult {
                target: self.name.clone(),
                path: self.path.clone(),
                status: None,
                latency,
                success: false,
                error: Some(format!("{:#}", e)),
                timestamp,
            },
        }
    }
}
