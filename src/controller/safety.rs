//! Standalone pre-peak checks.
//!
//! Each check reads telemetry once, applies a fixed threshold rule and starts
//! a grid charge directly when the battery is behind. Checks never touch the
//! persisted window or mode records.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use tracing::{error, info, warn};

use super::decision::DecisionEngine;
use super::peak_window::PeakWindowTracker;
use super::retry::RetryingTelemetry;
use crate::config::{DecisionConfig, SafetyConfig};
use crate::domain::{BatteryMode, ModeActuator, TelemetrySnapshot};
use crate::error::DispatchError;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[strum(serialize_all = "lowercase")]
pub enum SafetyCheck {
    /// Early-day assessment (e.g. 07:00)
    Morning,
    /// Mid-window assessment (e.g. 14:00)
    Midday,
    /// Last chance before the window opens (e.g. 15:30)
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SafetyAction {
    NoAction,
    Wait,
    GridCharge,
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetyVerdict {
    pub check: SafetyCheck,
    pub action: SafetyAction,
    pub message: String,
}

pub struct SafetyChecks {
    cfg: SafetyConfig,
    engine: DecisionEngine,
    tracker: PeakWindowTracker,
}

impl SafetyChecks {
    pub fn new(cfg: SafetyConfig, decision: DecisionConfig, tracker: PeakWindowTracker) -> Self {
        Self {
            cfg,
            engine: DecisionEngine::new(decision),
            tracker,
        }
    }

    pub fn evaluate(&self, check: SafetyCheck, soc: f64, solar_kw: f64) -> SafetyVerdict {
        use SafetyAction::*;
        let cfg = &self.cfg;

        let (action, message) = match check {
            SafetyCheck::Morning => {
                if soc >= cfg.ready_soc {
                    (
                        NoAction,
                        format!(
                            "SOC {soc:.1}% >= {:.0}%, already well charged for peak",
                            cfg.ready_soc
                        ),
                    )
                } else if solar_kw >= cfg.morning_good_solar_kw {
                    (
                        Wait,
                        format!("Good solar production ({solar_kw:.1} kW), letting solar charge"),
                    )
                } else if soc < cfg.morning_low_soc {
                    (
                        GridCharge,
                        format!(
                            "Low SOC ({soc:.1}%) and low solar ({solar_kw:.1} kW), \
                             starting grid charge now"
                        ),
                    )
                } else {
                    (
                        Wait,
                        format!(
                            "Solar marginal ({solar_kw:.1} kW), SOC acceptable ({soc:.1}%), \
                             monitoring"
                        ),
                    )
                }
            }
            SafetyCheck::Midday => {
                if soc >= cfg.ready_soc {
                    (
                        NoAction,
                        format!("SOC {soc:.1}% >= {:.0}%, ready for peak period", cfg.ready_soc),
                    )
                } else if soc >= cfg.midday_wait_soc && solar_kw > cfg.midday_wait_solar_kw {
                    (
                        Wait,
                        format!(
                            "SOC {soc:.1}% and solar still producing ({solar_kw:.1} kW), \
                             letting solar finish"
                        ),
                    )
                } else {
                    (
                        GridCharge,
                        format!(
                            "SOC {soc:.1}% below target with {solar_kw:.1} kW solar, \
                             starting grid charge"
                        ),
                    )
                }
            }
            SafetyCheck::Final => {
                let floor = self.engine.config().emergency_soc_floor;
                if soc < floor {
                    (
                        GridCharge,
                        format!(
                            "ALERT: SOC only {soc:.1}%, below minimum acceptable {floor:.0}%, \
                             starting emergency grid charge"
                        ),
                    )
                } else {
                    (NoAction, format!("SOC {soc:.1}% >= {floor:.0}%, ready for peak period"))
                }
            }
        };

        SafetyVerdict {
            check,
            action,
            message,
        }
    }

    /// Latest time a full grid charge to target can start and still finish
    /// before the window opens on `now`'s day
    pub fn grid_charge_deadline(&self, soc: f64, now: NaiveDateTime) -> NaiveDateTime {
        let hours = self.engine.hours_needed_grid(soc).max(0.0);
        self.tracker.window_start(now) - Duration::seconds((hours * 3600.0).round() as i64)
    }

    pub async fn run(
        &self,
        check: SafetyCheck,
        telemetry: &RetryingTelemetry,
        actuator: &dyn ModeActuator,
        now: NaiveDateTime,
    ) -> Result<SafetyVerdict, DispatchError> {
        info!(%check, "running safety check");
        let snapshot: TelemetrySnapshot = telemetry.fetch().await?;
        let soc = snapshot.soc_percent;

        if check == SafetyCheck::Morning && soc < self.cfg.ready_soc {
            let deadline = self.grid_charge_deadline(soc, now);
            info!(
                soc_percent = soc,
                hours_needed = self.engine.hours_needed_grid(soc),
                deadline = %deadline.format("%H:%M"),
                "grid charge must start by deadline to reach target"
            );
        }

        let verdict = self.evaluate(check, soc, snapshot.solar_kw);
        match verdict.action {
            SafetyAction::GridCharge => {
                warn!(
                    %check,
                    soc_percent = soc,
                    solar_kw = snapshot.solar_kw,
                    "{}",
                    verdict.message
                );
                if let Err(source) = actuator.set_mode(BatteryMode::GridCharge).await {
                    let err = DispatchError::ActuatorCommandFailed {
                        mode: BatteryMode::GridCharge,
                        source,
                    };
                    error!(%check, error = %err, "safety check could not start grid charge");
                }
            }
            SafetyAction::NoAction | SafetyAction::Wait => {
                info!(
                    %check,
                    soc_percent = soc,
                    solar_kw = snapshot.solar_kw,
                    "{}",
                    verdict.message
                );
            }
        }
        Ok(verdict)
    }
}
