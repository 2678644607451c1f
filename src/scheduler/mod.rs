//! Run scheduling: one orchestrated run at a time, paced by the controller.

use std::time::Duration;

use crate::telemetry::RunMode;

pub mod controller;
pub mod orchestrator;

pub use self::controller::{ControllerReport, ControllerState, ScheduleController, StopReason};
pub use self::orchestrator::RunOrchestrator;

/// Pacing knobs for the controller and the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerOptions {
    /// Minimum time between the end of one run and the start of the next.
    pub interval: Duration,
    /// Stop triggering runs after this many. `None` is unbounded.
    pub max_runs: Option<u32>,
    pub run_on_startup: bool,
    pub mode: RunMode,
    /// Pause between cases in individual mode.
    pub cadence: Duration,
    /// Honoured once at the start of every run.
    pub initial_delay: Duration,
    pub filters: Vec<String>,
    /// Cases in flight at once in batch mode. 1 runs them sequentially.
    pub batch_concurrency: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            max_runs: None,
            run_on_startup: true,
            mode: RunMode::Individual,
            cadence: Duration::from_secs(10),
            initial_delay: Duration::ZERO,
            filters: Vec::new(),
            batch_concurrency: 1,
        }
    }
}

impl SchedulerOptions {
    /// True once `runs` has used up the run budget.
    pub fn budget_exhausted(&self, runs: u32) -> bool {
        self.max_runs.is_some_and(|max| runs >= max)
    }
}
