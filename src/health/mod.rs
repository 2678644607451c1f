//! Service health: the blocking startup gate and the always-on monitor.

pub mod gate;
pub mod monitor;

pub use self::gate::{GateError, GateReport, HealthGate};
pub use self::monitor::HealthMonitor;
