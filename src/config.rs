use chrono::{Local, NaiveDateTime, Utc};
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::error::DispatchError;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "PEAKD__";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_lock_budget"))]
pub struct Config {
    #[validate(nested)]
    pub window: WindowConfig,
    #[validate(nested)]
    pub decision: DecisionConfig,
    #[validate(nested)]
    pub retry: RetryConfig,
    pub actuator: ActuatorConfig,
    #[validate(nested)]
    pub safety: SafetyConfig,
    #[validate(nested)]
    pub state: StateConfig,
    #[validate(nested)]
    pub gateway: GatewayConfig,
    pub logging: LoggingConfig,
}

/// Daily peak-rate window, `[peak_start_hour, peak_end_hour)` in local time
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_window"))]
pub struct WindowConfig {
    #[validate(range(max = 23))]
    pub peak_start_hour: u32,
    #[validate(range(min = 1, max = 24))]
    pub peak_end_hour: u32,
    /// IANA zone name; the host's local zone when unset
    pub timezone: Option<String>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            peak_start_hour: 17,
            peak_end_hour: 20,
            timezone: None,
        }
    }
}

impl WindowConfig {
    /// Current wall-clock time in the window's zone
    pub fn local_now(&self) -> Result<NaiveDateTime, DispatchError> {
        match &self.timezone {
            Some(name) => {
                let tz: Tz = name
                    .parse()
                    .map_err(|e| DispatchError::Config(format!("window.timezone: {e}")))?;
                Ok(Utc::now().with_timezone(&tz).naive_local())
            }
            None => Ok(Local::now().naive_local()),
        }
    }
}

fn validate_window(window: &WindowConfig) -> Result<(), ValidationError> {
    if window.peak_start_hour >= window.peak_end_hour {
        let mut err = ValidationError::new("peak_window_order");
        err.message = Some("peak_start_hour must be earlier than peak_end_hour".into());
        return Err(err);
    }
    if let Some(name) = &window.timezone {
        if name.parse::<Tz>().is_err() {
            let mut err = ValidationError::new("unknown_timezone");
            err.message = Some(format!("unknown timezone '{name}'").into());
            return Err(err);
        }
    }
    Ok(())
}

/// The env provider types all-digit values as numbers; credentials stay text
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
        Flag(bool),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Unsigned(n) => n.to_string(),
        Raw::Signed(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
        Raw::Flag(b) => b.to_string(),
    })
}

/// Worst-case telemetry fetch must finish well inside the stale-lock age, or
/// a live run could have its lock reclaimed
fn validate_lock_budget(cfg: &Config) -> Result<(), ValidationError> {
    let per_attempt = cfg.gateway.timeout_seconds + cfg.retry.delay_seconds;
    let budget_secs = u64::from(cfg.retry.max_attempts) * per_attempt;
    if budget_secs >= cfg.state.stale_lock_after().as_secs() {
        let mut err = ValidationError::new("retry_budget_exceeds_stale_lock");
        err.message = Some(
            format!(
                "retry budget of {budget_secs}s (max_attempts x (timeout_seconds + delay_seconds)) \
                 must be below state.stale_lock_minutes ({}s)",
                cfg.state.stale_lock_after().as_secs()
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}

/// Thresholds for the dispatch decision engine
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DecisionConfig {
    /// SoC the battery should reach before the window opens
    #[validate(range(min = 1.0, max = 100.0))]
    pub target_soc: f64,
    /// Observed grid-charge rate, percent of capacity per hour
    #[validate(range(min = 0.1, max = 100.0))]
    pub charge_rate_per_hour_pct: f64,
    #[validate(range(min = 0.0, max = 12.0))]
    pub safety_margin_hours: f64,
    /// Below this solar output the engine stops counting on solar
    #[validate(range(min = 0.0))]
    pub min_solar_kw_to_wait: f64,
    /// Last-chance floor used right before the window and by the final safety check
    #[validate(range(min = 0.0, max = 100.0))]
    pub emergency_soc_floor: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            target_soc: 95.0,
            charge_rate_per_hour_pct: 32.0,
            safety_margin_hours: 0.5,
            min_solar_kw_to_wait: 0.5,
            emergency_soc_floor: 75.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetryConfig {
    #[validate(range(min = 1, max = 50))]
    pub max_attempts: u32,
    #[validate(range(max = 600))]
    pub delay_seconds: u64,
    /// Stop retrying as soon as the gateway rejects the credentials
    pub fail_fast_on_auth: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_seconds: 10,
            fail_fast_on_auth: true,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Record the attempted mode even when the command fails, so a broken
    /// actuator is not hammered every run
    pub optimistic_update: bool,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            optimistic_update: true,
        }
    }
}

/// Thresholds for the standalone pre-peak checks
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SafetyConfig {
    #[validate(range(min = 0.0, max = 100.0))]
    pub ready_soc: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub midday_wait_soc: f64,
    #[validate(range(min = 0.0))]
    pub midday_wait_solar_kw: f64,
    #[validate(range(min = 0.0))]
    pub morning_good_solar_kw: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub morning_low_soc: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            ready_soc: 85.0,
            midday_wait_soc: 80.0,
            midday_wait_solar_kw: 1.0,
            morning_good_solar_kw: 1.5,
            morning_low_soc: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StateConfig {
    pub dir: PathBuf,
    #[validate(range(min = 1))]
    pub stale_lock_minutes: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("state"),
            stale_lock_minutes: 30,
        }
    }
}

impl StateConfig {
    pub fn stale_lock_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_minutes * 60)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GatewayProvider {
    Cloud,
    Sim,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GatewayConfig {
    pub provider: GatewayProvider,
    pub base_url: String,
    #[serde(deserialize_with = "string_or_number")]
    pub username: String,
    #[serde(deserialize_with = "string_or_number")]
    pub password: String,
    #[serde(deserialize_with = "string_or_number")]
    pub gateway_id: String,
    #[validate(range(min = 1, max = 300))]
    pub timeout_seconds: u64,
    /// Readings served by the `sim` provider
    #[validate(nested)]
    pub sim: SimReadings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: GatewayProvider::Cloud,
            base_url: "https://energy.example.invalid/api".to_string(),
            username: "__SET_VIA_ENV__".to_string(),
            password: "__SET_VIA_ENV__".to_string(),
            gateway_id: "__SET_VIA_ENV__".to_string(),
            timeout_seconds: 30,
            sim: SimReadings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SimReadings {
    #[validate(range(min = 0.0, max = 100.0))]
    pub soc_percent: f64,
    #[validate(range(min = 0.0))]
    pub solar_kw: f64,
    pub home_load_kw: f64,
}

impl Default for SimReadings {
    fn default() -> Self {
        Self {
            soc_percent: 60.0,
            solar_kw: 1.2,
            home_load_kw: 0.9,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for the daily decision log; disabled when unset
    pub decision_log_dir: Option<PathBuf>,
    pub json: bool,
}

impl Config {
    /// Layered load: built-in defaults, then the TOML file, then `PEAKD__*`
    /// environment variables (`PEAKD__DECISION__TARGET_SOC=90`).
    ///
    /// An explicitly given path must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, DispatchError> {
        let path = match path {
            Some(p) if !p.is_file() => {
                return Err(DispatchError::Config(format!(
                    "config file {} does not exist",
                    p.display()
                )));
            }
            Some(p) => p,
            None => Path::new(DEFAULT_CONFIG_PATH),
        };
        dotenvy::dotenv().ok();
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self, DispatchError> {
        let cfg: Config = figment
            .extract()
            .map_err(|e| DispatchError::Config(e.to_string()))?;
        cfg.validate()
            .map_err(|e| DispatchError::Config(e.to_string()))?;
        Ok(cfg)
    }
}
