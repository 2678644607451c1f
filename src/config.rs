//! TOML configuration for the medtrack E2E runner.
//!
//! Layered: compiled-in defaults, then a TOML file, then command-line
//! overrides. The file is found via `--config`, the `MEDTRACK_E2E_CONFIG`
//! environment variable, or `./medtrack-e2e.toml`, in that order.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::scheduler::SchedulerOptions;
use crate::telemetry::RunMode;

pub const CONFIG_ENV: &str = "MEDTRACK_E2E_CONFIG";
pub const LOCAL_CONFIG: &str = "medtrack-e2e.toml";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("schedule.interval_minutes must be at least 1")]
    ZeroInterval,
    #[error("schedule.batch_concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("health.{0} must be at least 1")]
    ZeroHealthSetting(&'static str),
    #[error("service '{0}' is configured more than once")]
    DuplicateService(String),
    #[error("service '{name}' has an invalid base_url '{url}'")]
    InvalidUrl { name: String, url: String },
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct E2eConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,
}

impl Default for E2eConfig {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig::default(),
            health: HealthConfig::default(),
            lifecycle: LifecycleConfig::default(),
            logging: LoggingConfig::default(),
            telemetry: TelemetryConfig::default(),
            services: default_services(),
        }
    }
}

impl E2eConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded runner configuration");
        Ok(config)
    }

    /// Resolve the configuration file:
    /// 1. `explicit` (from `--config`); failing to load it is an error.
    /// 2. The path in `MEDTRACK_E2E_CONFIG`.
    /// 3. `./medtrack-e2e.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        Ok(Self::load_or_default())
    }

    /// Steps 2-4 of [`E2eConfig::resolve`]. Unreadable files are logged and skipped.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "{} set but file could not be loaded, trying fallback", CONFIG_ENV
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule.interval_minutes == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.schedule.batch_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        for (name, value) in [
            ("gate_poll_seconds", self.health.gate_poll_seconds),
            ("monitor_interval_seconds", self.health.monitor_interval_seconds),
            ("request_timeout_seconds", self.health.request_timeout_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroHealthSetting(name));
            }
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            if !seen.insert(service.name.as_str()) {
                return Err(ConfigError::DuplicateService(service.name.clone()));
            }
            if reqwest::Url::parse(&service.base_url).is_err() {
                return Err(ConfigError::InvalidUrl {
                    name: service.name.clone(),
                    url: service.base_url.clone(),
                });
            }
        }
        Ok(())
    }

    /// Layer command-line values over the file values.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        let s = &mut self.schedule;
        if let Some(runs) = overrides.max_runs {
            s.max_runs = Some(runs);
        }
        if let Some(minutes) = overrides.interval_minutes {
            s.interval_minutes = minutes;
        }
        if overrides.no_startup {
            s.run_on_startup = false;
        }
        if let Some(individual) = overrides.individual {
            s.individual = individual;
        }
        if let Some(secs) = overrides.cadence_seconds {
            s.cadence_seconds = secs;
        }
        if let Some(secs) = overrides.initial_delay_seconds {
            s.initial_delay_seconds = secs;
        }
        if !overrides.filters.is_empty() {
            s.filters = overrides.filters.clone();
        }
        if overrides.json_logs {
            self.logging.format = LogFormat::Json;
        }
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        let s = &self.schedule;
        SchedulerOptions {
            interval: Duration::from_secs(s.interval_minutes.saturating_mul(60)),
            max_runs: s.max_runs,
            run_on_startup: s.run_on_startup,
            mode: if s.individual {
                RunMode::Individual
            } else {
                RunMode::Batch
            },
            cadence: Duration::from_secs(s.cadence_seconds),
            initial_delay: Duration::from_secs(s.initial_delay_seconds),
            filters: s.filters.clone(),
            batch_concurrency: s.batch_concurrency.max(1),
        }
    }
}

/// Values taken from the command line. `None` leaves the file value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub max_runs: Option<u32>,
    pub interval_minutes: Option<u64>,
    pub no_startup: bool,
    pub individual: Option<bool>,
    pub cadence_seconds: Option<u64>,
    pub initial_delay_seconds: Option<u64>,
    pub filters: Vec<String>,
    pub json_logs: bool,
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Minutes between runs.
    pub interval_minutes: u64,
    /// Stop triggering runs after this many. Unbounded when absent.
    pub max_runs: Option<u32>,
    pub run_on_startup: bool,
    /// Run cases one at a time with `cadence_seconds` between them.
    pub individual: bool,
    pub cadence_seconds: u64,
    pub initial_delay_seconds: u64,
    /// Case-insensitive substrings matched against test display names.
    pub filters: Vec<String>,
    /// Cases in flight at once in batch mode.
    pub batch_concurrency: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 5,
            max_runs: None,
            run_on_startup: true,
            individual: true,
            cadence_seconds: 10,
            initial_delay_seconds: 0,
            filters: Vec::new(),
            batch_concurrency: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub gate_timeout_seconds: u64,
    pub gate_poll_seconds: u64,
    /// Also the controller's tick.
    pub monitor_interval_seconds: u64,
    /// Per-request timeout for every service client.
    pub request_timeout_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            gate_timeout_seconds: 120,
            gate_poll_seconds: 2,
            monitor_interval_seconds: 5,
            request_timeout_seconds: 30,
        }
    }
}

impl HealthConfig {
    pub fn gate_timeout(&self) -> Duration {
        Duration::from_secs(self.gate_timeout_seconds)
    }

    pub fn gate_poll(&self) -> Duration {
        Duration::from_secs(self.gate_poll_seconds)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle / logging / telemetry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Fail a case when its fixture's initialize or dispose hook fails.
    pub strict: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Append every test event and run summary as JSON lines here.
    pub events_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Must be healthy before the first run.
    #[serde(default = "default_true")]
    pub gate: bool,
    /// Pinged by the health monitor.
    #[serde(default = "default_true")]
    pub monitor: bool,
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_true() -> bool {
    true
}

pub const GATEWAY: &str = "medicine-track-gateway";
pub const API: &str = "medicine-track-api";
pub const CONFIG_SERVICE: &str = "medicine-track-config";

fn default_services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig {
            name: GATEWAY.to_string(),
            base_url: "http://localhost:5000".to_string(),
            health_path: default_health_path(),
            gate: false,
            monitor: true,
        },
        ServiceConfig {
            name: API.to_string(),
            base_url: "http://localhost:5001".to_string(),
            health_path: default_health_path(),
            gate: true,
            monitor: true,
        },
        ServiceConfig {
            name: CONFIG_SERVICE.to_string(),
            base_url: "http://localhost:5002".to_string(),
            health_path: default_health_path(),
            gate: true,
            monitor: true,
        },
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
