use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::GatewayError;

/// Grid connection status as reported by the gateway
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum GridStatus {
    Normal,
    Outage,
    OffGrid,
    #[serde(other)]
    Unknown,
}

/// Lifetime energy counters (kWh). Under normal operation these never decrease;
/// a drop means the gateway reset its counters and is reported as-is.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct EnergyTotals {
    pub battery_charge_kwh: f64,
    pub battery_discharge_kwh: f64,
    pub grid_import_kwh: f64,
    pub solar_kwh: f64,
}

/// Point-in-time battery, solar and grid readings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySnapshot {
    pub observed_at: DateTime<Utc>,
    /// State of charge, 0-100
    pub soc_percent: f64,
    pub solar_kw: f64,
    /// Positive = importing from the grid
    pub grid_kw: f64,
    /// Positive = discharging
    pub battery_kw: f64,
    pub home_load_kw: f64,
    pub grid_status: GridStatus,
    pub totals: EnergyTotals,
}

impl TelemetrySnapshot {
    /// Reject readings the decision engine cannot act on.
    ///
    /// SoC must be finite and within [0, 100]. Slightly negative solar readings
    /// (inverter standby draw) are clamped to zero.
    pub fn validated(mut self) -> Result<Self, GatewayError> {
        if !self.soc_percent.is_finite() || !(0.0..=100.0).contains(&self.soc_percent) {
            return Err(GatewayError::InvalidPayload(format!(
                "state of charge {} outside 0-100%",
                self.soc_percent
            )));
        }
        let flows = [
            self.solar_kw,
            self.grid_kw,
            self.battery_kw,
            self.home_load_kw,
        ];
        if flows.iter().any(|v| !v.is_finite()) {
            return Err(GatewayError::InvalidPayload(
                "non-finite power reading".to_string(),
            ));
        }
        self.solar_kw = self.solar_kw.max(0.0);
        Ok(self)
    }
}
