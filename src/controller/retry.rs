use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::RetryConfig;
use crate::domain::{TelemetrySnapshot, TelemetrySource};
use crate::error::DispatchError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub fail_fast_on_auth: bool,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            delay: cfg.delay(),
            fail_fast_on_auth: cfg.fail_fast_on_auth,
        }
    }
}

/// Telemetry fetch with a bounded, fixed-delay retry budget.
///
/// Validation failures of the returned snapshot count as failed attempts.
#[derive(Clone)]
pub struct RetryingTelemetry {
    source: Arc<dyn TelemetrySource>,
    policy: RetryPolicy,
}

impl RetryingTelemetry {
    pub fn new(source: Arc<dyn TelemetrySource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    pub async fn fetch(&self) -> Result<TelemetrySnapshot, DispatchError> {
        // Always attempt at least once
        let max_attempts = self.policy.max_attempts.max(1);
        info!(max_attempts, "fetching telemetry snapshot");

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .source
                .snapshot()
                .await
                .and_then(TelemetrySnapshot::validated);

            match result {
                Ok(snapshot) => {
                    if attempt > 1 {
                        info!(attempt, "telemetry fetch succeeded after retry");
                    }
                    return Ok(snapshot);
                }
                Err(e) if self.policy.fail_fast_on_auth && !e.is_transient() => {
                    error!(
                        attempt,
                        error = %e,
                        "telemetry fetch failed with a non-transient error, not retrying"
                    );
                    return Err(DispatchError::TelemetryUnavailable {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) if attempt >= max_attempts => {
                    error!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "telemetry fetch failed, retry budget exhausted"
                    );
                    return Err(DispatchError::TelemetryUnavailable {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        delay_secs = self.policy.delay.as_secs(),
                        "telemetry fetch attempt failed, retrying"
                    );
                    tokio::time::sleep(self.policy.delay).await;
                }
            }
        }
    }
}
