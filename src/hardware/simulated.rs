use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::info;

use crate::config::SimReadings;
use crate::domain::{
    BatteryMode, EnergyTotals, GatewayError, GridStatus, ModeActuator, TelemetrySnapshot,
    TelemetrySource,
};

/// In-process gateway for dry runs and tests.
///
/// Serves a fixed snapshot, records every mode command, and can be told to
/// fail upcoming fetches or all mode commands.
#[derive(Debug)]
pub struct SimulatedGateway {
    snapshot: Mutex<TelemetrySnapshot>,
    pending_failures: Mutex<VecDeque<GatewayError>>,
    fail_commands: AtomicBool,
    commands: Mutex<Vec<BatteryMode>>,
    fetch_calls: AtomicU32,
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::from_readings(&SimReadings::default())
    }
}

impl SimulatedGateway {
    pub fn new(snapshot: TelemetrySnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            pending_failures: Mutex::new(VecDeque::new()),
            fail_commands: AtomicBool::new(false),
            commands: Mutex::new(Vec::new()),
            fetch_calls: AtomicU32::new(0),
        }
    }

    pub fn from_readings(readings: &SimReadings) -> Self {
        let battery_kw = readings.home_load_kw - readings.solar_kw;
        Self::new(TelemetrySnapshot {
            observed_at: Utc::now(),
            soc_percent: readings.soc_percent,
            solar_kw: readings.solar_kw,
            grid_kw: 0.0,
            battery_kw,
            home_load_kw: readings.home_load_kw,
            grid_status: GridStatus::Normal,
            totals: EnergyTotals::default(),
        })
    }

    /// Queue errors returned by the next fetches, in order
    pub fn with_fetch_failures(self, failures: impl IntoIterator<Item = GatewayError>) -> Self {
        self.pending_failures.lock().extend(failures);
        self
    }

    pub fn with_failing_commands(self) -> Self {
        self.fail_commands.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_soc(&self, soc_percent: f64, solar_kw: f64) {
        let mut snapshot = self.snapshot.lock();
        snapshot.soc_percent = soc_percent;
        snapshot.solar_kw = solar_kw;
    }

    pub fn current_snapshot(&self) -> TelemetrySnapshot {
        self.snapshot.lock().clone()
    }

    pub fn commands(&self) -> Vec<BatteryMode> {
        self.commands.lock().clone()
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetrySource for SimulatedGateway {
    async fn snapshot(&self) -> Result<TelemetrySnapshot, GatewayError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.pending_failures.lock().pop_front() {
            return Err(err);
        }
        let mut snapshot = self.snapshot.lock().clone();
        snapshot.observed_at = Utc::now();
        Ok(snapshot)
    }
}

#[async_trait]
impl ModeActuator for SimulatedGateway {
    async fn set_mode(&self, mode: BatteryMode) -> Result<(), GatewayError> {
        self.commands.lock().push(mode);
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(GatewayError::Upstream {
                status: 503,
                body: "simulated actuator failure".to_string(),
            });
        }
        info!(%mode, "simulated gateway accepted mode command");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queued_failures_then_snapshot() {
        let gateway = SimulatedGateway::default()
            .with_fetch_failures([GatewayError::Timeout("slow".into())]);
        assert!(gateway.snapshot().await.is_err());
        let snapshot = gateway.snapshot().await.unwrap();
        assert_eq!(snapshot.soc_percent, 60.0);
        assert_eq!(gateway.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn test_commands_recorded_even_when_failing() {
        let gateway = SimulatedGateway::default().with_failing_commands();
        assert!(gateway.set_mode(BatteryMode::GridCharge).await.is_err());
        assert_eq!(gateway.commands(), vec![BatteryMode::GridCharge]);
    }
}
