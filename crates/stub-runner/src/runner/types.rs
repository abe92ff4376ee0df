//! Type definitions for the fleet driver.

use crate::error::TeardownError;
use std::fmt;

/// Lifecycle of one fleet of stub servers.
///
/// `NOT_STARTED -> RESOLVING -> STARTING -> RUNNING -> STOPPING -> STOPPED`,
/// with `FAILED` reachable from `RESOLVING` and `STARTING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FleetState {
    NotStarted,
    Resolving,
    Starting,
    Running,
    Stopping,
    Stopped,
    /// Terminal; the fleet is never retried.
    Failed,
}

impl FleetState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FleetState::Stopped | FleetState::Failed)
    }
}

impl fmt::Display for FleetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FleetState::NotStarted => "NOT_STARTED",
            FleetState::Resolving => "RESOLVING",
            FleetState::Starting => "STARTING",
            FleetState::Running => "RUNNING",
            FleetState::Stopping => "STOPPING",
            FleetState::Stopped => "STOPPED",
            FleetState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Outcome of tearing a fleet down.
///
/// Teardown never stops early, so every failure it ran into is listed here
/// instead of being raised.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Stub groups that were stopped
    pub stopped: usize,
    pub errors: Vec<TeardownError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
