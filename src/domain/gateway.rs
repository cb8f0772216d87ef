use async_trait::async_trait;
use thiserror::Error;

use super::{BatteryMode, TelemetrySnapshot};

/// Errors from the upstream battery gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Authentication rejected: {0}")]
    Authentication(String),
    #[error("Gateway returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("Invalid gateway payload: {0}")]
    InvalidPayload(String),
}

impl GatewayError {
    /// Whether retrying the same request can reasonably succeed.
    ///
    /// Credentials and client-side request errors will fail the same way on
    /// every attempt; throttling and server errors will not.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Timeout(_)
            | GatewayError::Connection(_)
            | GatewayError::InvalidPayload(_) => true,
            GatewayError::Authentication(_) => false,
            GatewayError::Upstream { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Source of live battery/solar/grid readings
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn snapshot(&self) -> Result<TelemetrySnapshot, GatewayError>;
}

/// Issues operating mode commands to the battery.
///
/// A successful return only means the command was accepted; the next telemetry
/// read may not reflect it yet.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModeActuator: Send + Sync {
    async fn set_mode(&self, mode: BatteryMode) -> Result<(), GatewayError>;
}
