use anyhow::{Context, Result};
use clap::Parser;
use peak_dispatch::cli::{Cli, Command};
use peak_dispatch::controller::{
    send_manual_mode, PeakWindowTracker, RetryPolicy, RetryingTelemetry, SafetyChecks,
};
use peak_dispatch::hardware::build_gateway;
use peak_dispatch::repo::FileStateStore;
use peak_dispatch::telemetry::init_tracing;
use peak_dispatch::{Config, DispatchController, DispatchError};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match Config::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(e.exit_code());
        }
    };

    let _log_guard = match init_tracing(&cfg.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialise logging: {e:#}");
            return ExitCode::from(4);
        }
    };

    match run(cli.command(), &cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.downcast_ref::<DispatchError>().map_or(1, DispatchError::exit_code);
            let message = format!("{e:#}");
            error!(error = %message, exit_code = code, "peak dispatch failed");
            ExitCode::from(code)
        }
    }
}

async fn run(command: Command, cfg: &Config) -> Result<()> {
    let gateway = build_gateway(&cfg.gateway)?;
    let now = cfg.window.local_now()?;

    match command {
        Command::Run => {
            let store = FileStateStore::new(&cfg.state.dir, cfg.state.stale_lock_after())
                .map_err(|e| DispatchError::persistence("state directory", e))?;
            let controller =
                DispatchController::new(cfg, gateway.telemetry, gateway.actuator, Arc::new(store));
            let report = controller.run_once(now).await?;
            info!(
                desired_mode = %report.decision.desired_mode,
                switched = report.decision.should_switch,
                in_peak = report.in_peak,
                "dispatch run complete"
            );
        }
        Command::Check { check } => {
            let checks = SafetyChecks::new(
                cfg.safety.clone(),
                cfg.decision.clone(),
                PeakWindowTracker::from_config(&cfg.window),
            );
            let telemetry =
                RetryingTelemetry::new(gateway.telemetry, RetryPolicy::from(&cfg.retry));
            let verdict = checks
                .run(check, &telemetry, gateway.actuator.as_ref(), now)
                .await?;
            info!(%check, action = ?verdict.action, "safety check complete");
        }
        Command::Status => {
            let telemetry =
                RetryingTelemetry::new(gateway.telemetry, RetryPolicy::from(&cfg.retry));
            let snapshot = telemetry.fetch().await?;
            let json = serde_json::to_string_pretty(&snapshot)
                .context("failed to render gateway status")?;
            println!("{json}");
        }
        Command::Mode { mode } => {
            send_manual_mode(gateway.actuator.as_ref(), mode.into()).await?;
        }
    }
    Ok(())
}
