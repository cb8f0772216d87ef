use serde::{Deserialize, Serialize};

/// Operating mode the controller commands on the battery gateway
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
)]
pub enum BatteryMode {
    /// Emergency backup: the battery charges from the grid
    #[strum(serialize = "BACKUP")]
    #[serde(rename = "BACKUP")]
    GridCharge,
    /// Time-of-use: the battery only charges from on-site solar
    #[strum(serialize = "TOU")]
    #[serde(rename = "TOU")]
    SolarFirst,
}

impl BatteryMode {
    /// Mode identifier used by the gateway API
    pub fn api_name(&self) -> &'static str {
        match self {
            BatteryMode::GridCharge => "emergency_backup",
            BatteryMode::SolarFirst => "time_of_use",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            BatteryMode::GridCharge => "Grid charge (backup mode)",
            BatteryMode::SolarFirst => "Solar-first (TOU mode)",
        }
    }
}

/// Which rule of the decision priority produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum DecisionReason {
    InPeak,
    TargetMet,
    PeakImminentEmergency,
    PeakImminentAcceptable,
    OutOfTime,
    LowSolarTightBuffer,
    LowSolarBufferOk,
    SolarSufficient,
    MonitorBufferOk,
    SolarShortfall,
}

/// Outcome of one decision evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchDecision {
    pub desired_mode: BatteryMode,
    pub should_switch: bool,
    pub reason: DecisionReason,
    pub rationale: String,
}
