pub mod decision;
pub mod peak_window;
pub mod retry;
pub mod safety;

use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::{
    BatteryMode, DispatchDecision, ModeActuator, TelemetrySnapshot, TelemetrySource, WindowEvent,
};
use crate::error::DispatchError;
use crate::repo::StateStore;
use crate::telemetry::DECISION_LOG_TARGET;

pub use decision::{DecisionEngine, DecisionInputs};
pub use peak_window::{PeakWindowTracker, WindowUpdate};
pub use retry::{RetryPolicy, RetryingTelemetry};
pub use safety::{SafetyAction, SafetyCheck, SafetyChecks, SafetyVerdict};

/// What one dispatch run observed and did
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub snapshot: TelemetrySnapshot,
    pub in_peak: bool,
    pub window_event: Option<WindowEvent>,
    pub hours_to_peak: f64,
    pub decision: DispatchDecision,
    /// Whether the mode command was accepted, if one was sent
    pub command_accepted: Option<bool>,
    /// Mode written to the commanded-mode record this run
    pub recorded_mode: Option<BatteryMode>,
}

/// Runs one read-decide-act-persist cycle per invocation.
///
/// The whole cycle holds the store's run lock, and nothing is persisted until
/// the decision and any mode command have completed.
pub struct DispatchController {
    telemetry: RetryingTelemetry,
    actuator: Arc<dyn ModeActuator>,
    store: Arc<dyn StateStore>,
    tracker: PeakWindowTracker,
    engine: DecisionEngine,
    optimistic_update: bool,
}

impl DispatchController {
    pub fn new(
        cfg: &Config,
        source: Arc<dyn TelemetrySource>,
        actuator: Arc<dyn ModeActuator>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            telemetry: RetryingTelemetry::new(source, RetryPolicy::from(&cfg.retry)),
            actuator,
            store,
            tracker: PeakWindowTracker::from_config(&cfg.window),
            engine: DecisionEngine::new(cfg.decision.clone()),
            optimistic_update: cfg.actuator.optimistic_update,
        }
    }

    pub async fn run_once(&self, now: NaiveDateTime) -> Result<RunReport, DispatchError> {
        let _lock = self
            .store
            .acquire_run_lock()
            .map_err(|e| DispatchError::persistence("run lock", e))?;

        let snapshot = self.telemetry.fetch().await?;

        let prior_window = self
            .store
            .load_peak_state()
            .map_err(|e| DispatchError::persistence("peak state", e))?;
        let commanded = self
            .store
            .load_commanded_mode()
            .map_err(|e| DispatchError::persistence("commanded mode", e))?;

        let window = self.tracker.update(prior_window.as_ref(), now);
        match window.event {
            Some(WindowEvent::Entered) => {
                info!(target: DECISION_LOG_TARGET, "Peak period started: {}", window.state)
            }
            Some(WindowEvent::Exited) => {
                info!(target: DECISION_LOG_TARGET, "Peak period ended: {}", window.state)
            }
            None => {}
        }

        let hours_to_peak = self.tracker.hours_to_peak(now);
        let inputs = DecisionInputs {
            soc_percent: snapshot.soc_percent,
            solar_kw: snapshot.solar_kw,
            hours_to_peak,
            in_peak: window.in_peak,
        };
        let decision = self.engine.decide(&inputs, commanded);
        let reason: &'static str = decision.reason.into();

        let status = if window.in_peak {
            "IN PEAK".to_string()
        } else {
            format!("{hours_to_peak:.1}h to peak")
        };
        info!(
            target: DECISION_LOG_TARGET,
            soc_percent = snapshot.soc_percent,
            solar_kw = snapshot.solar_kw,
            grid_kw = snapshot.grid_kw,
            battery_kw = snapshot.battery_kw,
            home_load_kw = snapshot.home_load_kw,
            grid_status = %snapshot.grid_status,
            "SOC: {:.1}%, Solar: {:.3}kW, Status: {}",
            snapshot.soc_percent,
            snapshot.solar_kw,
            status
        );
        info!(target: DECISION_LOG_TARGET, reason, "Decision: {}", decision.rationale);
        info!(target: DECISION_LOG_TARGET, "Action: {}", decision.desired_mode.describe());

        let mut command_accepted = None;
        let mut recorded_mode = None;
        if decision.should_switch {
            let previous = commanded.map_or_else(|| "unknown".to_string(), |m| m.to_string());
            match self.actuator.set_mode(decision.desired_mode).await {
                Ok(()) => {
                    info!(
                        target: DECISION_LOG_TARGET,
                        from = %previous,
                        to = %decision.desired_mode,
                        "Mode changed: {} -> {}",
                        previous,
                        decision.desired_mode
                    );
                    command_accepted = Some(true);
                    recorded_mode = Some(decision.desired_mode);
                }
                Err(source) => {
                    let err = DispatchError::ActuatorCommandFailed {
                        mode: decision.desired_mode,
                        source,
                    };
                    warn!(
                        target: DECISION_LOG_TARGET,
                        error = %err,
                        optimistic_update = self.optimistic_update,
                        "mode command failed"
                    );
                    command_accepted = Some(false);
                    if self.optimistic_update {
                        recorded_mode = Some(decision.desired_mode);
                    }
                }
            }
        } else {
            info!(target: DECISION_LOG_TARGET, "Mode unchanged: {}", decision.desired_mode);
        }

        if window.changed {
            self.store
                .save_peak_state(&window.state)
                .map_err(|e| DispatchError::persistence("peak state", e))?;
        }
        if let Some(mode) = recorded_mode {
            self.store
                .save_commanded_mode(mode)
                .map_err(|e| DispatchError::persistence("commanded mode", e))?;
        }

        Ok(RunReport {
            snapshot,
            in_peak: window.in_peak,
            window_event: window.event,
            hours_to_peak,
            decision,
            command_accepted,
            recorded_mode,
        })
    }
}

/// Manual override: one mode command with no retry and no state writes.
pub async fn send_manual_mode(
    actuator: &dyn ModeActuator,
    mode: BatteryMode,
) -> Result<(), DispatchError> {
    actuator
        .set_mode(mode)
        .await
        .map_err(|source| DispatchError::ActuatorCommandFailed { mode, source })?;
    info!(target: DECISION_LOG_TARGET, "Manual override: {}", mode.describe());
    Ok(())
}
