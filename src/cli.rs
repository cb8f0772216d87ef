use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::controller::SafetyCheck;
use crate::domain::BatteryMode;

#[derive(Parser, Debug)]
#[command(
    name = "peak-dispatch",
    version,
    about = "Keeps a home battery charged ahead of the daily peak-rate window"
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, env = "PEAKD_CONFIG")]
    pub config: Option<PathBuf>,

    /// What to do. Defaults to a single dispatch run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq, Default)]
pub enum Command {
    /// Read telemetry, decide, and switch the battery mode if needed.
    #[default]
    Run,
    /// Run one of the standalone pre-peak safety checks.
    Check {
        #[arg(value_enum)]
        check: SafetyCheck,
    },
    /// Print the current gateway readings as JSON and exit.
    Status,
    /// Send a mode command directly, leaving the persisted records alone.
    Mode {
        #[arg(value_enum)]
        mode: ModeArg,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Charge from the grid (BACKUP)
    Backup,
    /// Solar first, time-of-use (TOU)
    Tou,
}

impl From<ModeArg> for BatteryMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Backup => BatteryMode::GridCharge,
            ModeArg::Tou => BatteryMode::SolarFirst,
        }
    }
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or_default()
    }
}
