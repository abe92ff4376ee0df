//! Error types for the stub runner.
//!
//! Errors are layered the same way the engine is: the port allocator, the
//! transport seam, a single stub group start, and the fleet as a whole each
//! have their own enum.

use std::path::PathBuf;
use std::time::Duration;

use crate::runner::FleetState;

/// Errors raised by the [`PortAllocator`](crate::port::PortAllocator).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("No free ports left in range {min}-{max}")]
    Exhausted { min: u16, max: u16 },
    #[error("Port {0} is already allocated")]
    AlreadyAllocated(u16),
    #[error("Invalid port range {min}-{max}")]
    InvalidRange { min: u16, max: u16 },
}

/// Errors reported by a mock-server transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The port could not be bound. Retryable with a different port.
    #[error("Failed to bind port {port}: {reason}")]
    Bind { port: u16, reason: String },
    /// The server failed to initialize for a reason other than binding.
    #[error("Failed to start stub server: {0}")]
    Start(String),
    #[error("Failed to stop stub server: {0}")]
    Stop(String),
}

impl TransportError {
    pub fn is_bind(&self) -> bool {
        matches!(self, TransportError::Bind { .. })
    }
}

/// Failure to bring up a single stub group.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StartError {
    #[error("Could not allocate a port for {coordinate}: {source}")]
    PortAllocation {
        coordinate: String,
        #[source]
        source: PortError,
    },
    #[error("Could not bind {coordinate} after {attempts} attempt(s), last port {port}: {reason}")]
    PortBind {
        coordinate: String,
        port: u16,
        attempts: u32,
        reason: String,
    },
    #[error("Stub server for {coordinate} failed to start: {reason}")]
    Transport { coordinate: String, reason: String },
    #[error("Start of {coordinate} was abandoned")]
    Abandoned { coordinate: String },
}

impl StartError {
    /// The coordinate of the stub group that failed.
    pub fn coordinate(&self) -> &str {
        match self {
            StartError::PortAllocation { coordinate, .. }
            | StartError::PortBind { coordinate, .. }
            | StartError::Transport { coordinate, .. }
            | StartError::Abandoned { coordinate } => coordinate,
        }
    }
}

/// Errors surfaced by the [`StubRunner`](crate::runner::StubRunner).
#[derive(Debug, thiserror::Error)]
pub enum StubRunnerError {
    #[error("No stubs were resolved and failOnNoStubs is enabled")]
    NoStubsResolved,
    /// `rollback` lists what went wrong while stopping the groups that did start.
    #[error("{} stub group(s) failed to start: {}", .failures.len(), summarize(.failures))]
    FleetStart {
        failures: Vec<StartError>,
        rollback: Vec<TeardownError>,
    },
    #[error("Stub fleet did not start within {timeout:?} ({started} group(s) had started)")]
    StartTimeout {
        timeout: Duration,
        started: usize,
        rollback: Vec<TeardownError>,
    },
    #[error("Stub runner is {actual}, expected {expected}")]
    InvalidState {
        expected: FleetState,
        actual: FleetState,
    },
    #[error("Invalid stub runner configuration: {0}")]
    InvalidConfig(String),
}

fn summarize(failures: &[StartError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from resolving stubs out of a local repository.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("No stubs found for {0}")]
    NotFound(String),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid mapping file {path}: {reason}")]
    InvalidMapping { path: PathBuf, reason: String },
}

/// A failure recorded while tearing the fleet down.
#[derive(Debug, thiserror::Error)]
pub enum TeardownError {
    #[error("Failed to stop {coordinate} on port {port}: {reason}")]
    Stop {
        coordinate: String,
        port: u16,
        reason: String,
    },
    #[error("Failed to delete stub storage: {0}")]
    Purge(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fleet_start_lists_every_coordinate() {
        let err = StubRunnerError::FleetStart {
            failures: vec![
                StartError::Transport {
                    coordinate: "com.example:foo:1.0:stubs".to_string(),
                    reason: "boom".to_string(),
                },
                StartError::Abandoned {
                    coordinate: "com.example:bar:1.0:stubs".to_string(),
                },
            ],
            rollback: Vec::new(),
        };
        let message = err.to_string();
        assert!(message.starts_with("2 stub group(s) failed to start"));
        assert!(message.contains("com.example:foo:1.0:stubs"));
        assert!(message.contains("com.example:bar:1.0:stubs"));
    }

    #[test]
    fn test_bind_errors_are_retryable() {
        let bind = TransportError::Bind {
            port: 10001,
            reason: "address in use".to_string(),
        };
        assert!(bind.is_bind());
        assert!(!TransportError::Start("bad regex".to_string()).is_bind());
    }
}
