use std::path::PathBuf;
use thiserror::Error;

use crate::domain::{BatteryMode, GatewayError};
use crate::repo::StoreError;

/// Failures of a single dispatch or safety-check invocation
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Telemetry unavailable after {attempts} attempt(s): {source}")]
    TelemetryUnavailable {
        attempts: u32,
        #[source]
        source: GatewayError,
    },
    #[error("Mode command {mode} failed: {source}")]
    ActuatorCommandFailed {
        mode: BatteryMode,
        #[source]
        source: GatewayError,
    },
    #[error("Failed to persist {record}: {source}")]
    StatePersistenceFailed {
        record: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("Another dispatch run holds the lock at {}", path.display())]
    RunInProgress { path: PathBuf },
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DispatchError {
    /// Process exit code reported to the scheduler
    pub fn exit_code(&self) -> u8 {
        match self {
            DispatchError::TelemetryUnavailable { .. } => 1,
            DispatchError::ActuatorCommandFailed { .. } => 1,
            DispatchError::StatePersistenceFailed { .. } => 2,
            DispatchError::RunInProgress { .. } => 3,
            DispatchError::Config(_) => 4,
        }
    }

    pub fn persistence(record: &'static str, source: StoreError) -> Self {
        match source {
            StoreError::Locked { path } => DispatchError::RunInProgress { path },
            source => DispatchError::StatePersistenceFailed { record, source },
        }
    }
}
