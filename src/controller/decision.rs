//! Grid-charge vs. solar-first decision.
//!
//! The rules are evaluated in priority order and the first match wins:
//!
//! 1. inside the peak window nothing is switched
//! 2. target SoC already reached
//! 3. window opens in under half an hour: emergency floor only
//! 4. not enough time left to grid-charge to target
//! 5. too little solar to count on
//! 6. estimated solar contribution vs. remaining deficit

use crate::config::DecisionConfig;
use crate::domain::{BatteryMode, DecisionReason, DispatchDecision};

/// Below this many hours to peak only the emergency floor is considered
const IMMINENT_PEAK_HOURS: f64 = 0.5;
/// Share of raw PV output that ends up in the battery
const SOLAR_DERATE: f64 = 0.7;
/// Empirical SoC gain per kWh of solar reaching the battery
const SOC_PCT_PER_KWH: f64 = 3.0;
/// With low solar, grid-charge once the buffer falls under this
const TIGHT_BUFFER_HOURS: f64 = 1.0;
/// With insufficient solar, keep monitoring while the buffer exceeds this
const MONITOR_BUFFER_HOURS: f64 = 2.0;

/// Readings the engine decides on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionInputs {
    pub soc_percent: f64,
    pub solar_kw: f64,
    pub hours_to_peak: f64,
    pub in_peak: bool,
}

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    cfg: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(cfg: DecisionConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.cfg
    }

    /// Hours of grid charging needed to reach target from `soc`, margin included
    pub fn hours_needed_grid(&self, soc: f64) -> f64 {
        let deficit = self.cfg.target_soc - soc;
        deficit / self.cfg.charge_rate_per_hour_pct + self.cfg.safety_margin_hours
    }

    /// Decide against the last commanded mode. Never switches inside the window.
    pub fn decide(
        &self,
        inputs: &DecisionInputs,
        commanded: Option<BatteryMode>,
    ) -> DispatchDecision {
        let (evaluated, reason, rationale) = self.evaluate(inputs);
        let desired_mode = evaluated.or(commanded).unwrap_or(BatteryMode::SolarFirst);
        let should_switch = !inputs.in_peak && commanded != Some(desired_mode);
        DispatchDecision {
            desired_mode,
            should_switch,
            reason,
            rationale,
        }
    }

    /// Walk the priority rules. Returns `None` for the mode when no mode should
    /// be asserted (inside the peak window).
    pub fn evaluate(
        &self,
        inputs: &DecisionInputs,
    ) -> (Option<BatteryMode>, DecisionReason, String) {
        use BatteryMode::{GridCharge, SolarFirst};

        let cfg = &self.cfg;
        let soc = inputs.soc_percent;
        let solar_kw = inputs.solar_kw;
        let hours_to_peak = inputs.hours_to_peak;

        if inputs.in_peak {
            return (
                None,
                DecisionReason::InPeak,
                format!("In peak period, no action (SOC: {soc:.1}%)"),
            );
        }

        if soc >= cfg.target_soc {
            return (
                Some(SolarFirst),
                DecisionReason::TargetMet,
                format!("Already at target ({soc:.1}% >= {:.1}%)", cfg.target_soc),
            );
        }

        if hours_to_peak < IMMINENT_PEAK_HOURS {
            let minutes = hours_to_peak * 60.0;
            return if soc < cfg.emergency_soc_floor {
                (
                    Some(GridCharge),
                    DecisionReason::PeakImminentEmergency,
                    format!("EMERGENCY: Peak in {minutes:.0} min, SOC only {soc:.1}%"),
                )
            } else {
                (
                    Some(SolarFirst),
                    DecisionReason::PeakImminentAcceptable,
                    format!("Peak imminent, but SOC acceptable ({soc:.1}%)"),
                )
            };
        }

        let soc_deficit = cfg.target_soc - soc;
        let hours_needed = self.hours_needed_grid(soc);
        let buffer_hours = hours_to_peak - hours_needed;

        if buffer_hours <= 0.0 {
            return (
                Some(GridCharge),
                DecisionReason::OutOfTime,
                format!(
                    "Out of time! Must start now \
                     (need {hours_needed:.1}h, have {hours_to_peak:.1}h)"
                ),
            );
        }

        if solar_kw < cfg.min_solar_kw_to_wait {
            return if buffer_hours < TIGHT_BUFFER_HOURS {
                (
                    Some(GridCharge),
                    DecisionReason::LowSolarTightBuffer,
                    format!(
                        "Low solar ({solar_kw:.2}kW) and running out of time \
                         ({buffer_hours:.1}h buffer left)"
                    ),
                )
            } else {
                (
                    Some(SolarFirst),
                    DecisionReason::LowSolarBufferOk,
                    format!(
                        "Low solar ({solar_kw:.2}kW) but time buffer OK ({buffer_hours:.1}h left)"
                    ),
                )
            };
        }

        let solar_potential = solar_kw * SOLAR_DERATE * hours_to_peak * SOC_PCT_PER_KWH;
        if solar_potential >= soc_deficit {
            (
                Some(SolarFirst),
                DecisionReason::SolarSufficient,
                format!(
                    "Solar can provide ~{solar_potential:.1}% (need {soc_deficit:.1}%), \
                     {solar_kw:.2}kW looks promising"
                ),
            )
        } else if buffer_hours > MONITOR_BUFFER_HOURS {
            (
                Some(SolarFirst),
                DecisionReason::MonitorBufferOk,
                format!(
                    "Solar may fall short, but monitoring - {buffer_hours:.1}h buffer remaining"
                ),
            )
        } else {
            (
                Some(GridCharge),
                DecisionReason::SolarShortfall,
                format!(
                    "Solar unlikely to provide enough \
                     ({solar_potential:.1}% < {soc_deficit:.1}%), starting grid charge"
                ),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use BatteryMode::{GridCharge, SolarFirst};
    use DecisionReason::{
        LowSolarTightBuffer, MonitorBufferOk, PeakImminentAcceptable, PeakImminentEmergency,
        SolarShortfall, SolarSufficient, TargetMet,
    };

    fn engine() -> DecisionEngine {
        DecisionEngine::new(DecisionConfig::default())
    }

    fn inputs(soc: f64, solar_kw: f64, hours_to_peak: f64, in_peak: bool) -> DecisionInputs {
        DecisionInputs {
            soc_percent: soc,
            solar_kw,
            hours_to_peak,
            in_peak,
        }
    }

    #[test]
    fn test_low_solar_with_buffer_waits() {
        // deficit 35, needed 35/32 + 0.5 = 1.59h, buffer 1.41h
        let d = engine().decide(&inputs(60.0, 0.2, 3.0, false), Some(BatteryMode::GridCharge));
        assert_eq!(d.desired_mode, BatteryMode::SolarFirst);
        assert_eq!(d.reason, DecisionReason::LowSolarBufferOk);
        assert!(d.should_switch);
        assert!(d.rationale.contains("time buffer OK (1.4h left)"));
    }

    #[test]
    fn test_out_of_time_grid_charges() {
        // buffer 1.5 - 1.59 = -0.09h
        let d = engine().decide(&inputs(60.0, 0.2, 1.5, false), Some(BatteryMode::SolarFirst));
        assert_eq!(d.desired_mode, BatteryMode::GridCharge);
        assert_eq!(d.reason, DecisionReason::OutOfTime);
        assert!(d.should_switch);
        assert_eq!(d.rationale, "Out of time! Must start now (need 1.6h, have 1.5h)");
    }

    #[test]
    fn test_in_peak_never_switches() {
        let d = engine().decide(&inputs(10.0, 0.0, 0.0, true), Some(BatteryMode::SolarFirst));
        assert!(!d.should_switch);
        assert_eq!(d.reason, DecisionReason::InPeak);
        assert_eq!(d.desired_mode, BatteryMode::SolarFirst);

        let d = engine().decide(&inputs(10.0, 0.0, 0.0, true), None);
        assert!(!d.should_switch);
    }

    #[rstest]
    #[case::target_met(96.0, 0.0, 5.0, SolarFirst, TargetMet)]
    #[case::imminent_emergency(70.0, 3.0, 0.25, GridCharge, PeakImminentEmergency)]
    #[case::imminent_acceptable(80.0, 0.0, 0.25, SolarFirst, PeakImminentAcceptable)]
    #[case::low_solar_tight(60.0, 0.1, 2.2, GridCharge, LowSolarTightBuffer)]
    #[case::solar_sufficient(80.0, 2.0, 4.0, SolarFirst, SolarSufficient)]
    #[case::monitor(30.0, 1.0, 7.0, SolarFirst, MonitorBufferOk)]
    #[case::shortfall(50.0, 1.0, 3.5, GridCharge, SolarShortfall)]
    fn test_priority_rules(
        #[case] soc: f64,
        #[case] solar_kw: f64,
        #[case] hours_to_peak: f64,
        #[case] mode: BatteryMode,
        #[case] reason: DecisionReason,
    ) {
        let d = engine().decide(&inputs(soc, solar_kw, hours_to_peak, false), None);
        assert_eq!(d.desired_mode, mode);
        assert_eq!(d.reason, reason);
        assert!(d.should_switch);
    }

    #[test]
    fn test_emergency_floor_is_configurable() {
        let engine = DecisionEngine::new(DecisionConfig {
            emergency_soc_floor: 85.0,
            ..DecisionConfig::default()
        });
        let d = engine.decide(&inputs(80.0, 0.0, 0.25, false), None);
        assert_eq!(d.desired_mode, BatteryMode::GridCharge);
    }

    proptest! {
        #[test]
        fn prop_target_met_is_solar_first(
            soc in 95.0f64..=100.0,
            solar_kw in 0.0f64..15.0,
            hours_to_peak in 0.0f64..24.0,
        ) {
            let d = engine().decide(&inputs(soc, solar_kw, hours_to_peak, false), None);
            prop_assert_eq!(d.desired_mode, BatteryMode::SolarFirst);
        }

        #[test]
        fn prop_in_peak_never_switches(
            soc in 0.0f64..=100.0,
            solar_kw in 0.0f64..15.0,
            hours_to_peak in 0.0f64..24.0,
            grid in any::<bool>(),
            known in any::<bool>(),
        ) {
            let mode = if grid { BatteryMode::GridCharge } else { BatteryMode::SolarFirst };
            let commanded = known.then_some(mode);
            let d = engine().decide(&inputs(soc, solar_kw, hours_to_peak, true), commanded);
            prop_assert!(!d.should_switch);
        }

        #[test]
        fn prop_no_switch_when_already_commanded(
            soc in 0.0f64..=100.0,
            solar_kw in 0.0f64..15.0,
            hours_to_peak in 0.0f64..24.0,
            in_peak in any::<bool>(),
        ) {
            let first = engine().decide(&inputs(soc, solar_kw, hours_to_peak, in_peak), None);
            let again = engine().decide(
                &inputs(soc, solar_kw, hours_to_peak, in_peak),
                Some(first.desired_mode),
            );
            prop_assert!(!again.should_switch);
        }
    }
}
