use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;

/// Target for the human-readable dispatch audit trail
pub const DECISION_LOG_TARGET: &str = "peak_dispatch::decision";

const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn";

/// Install the global subscriber.
///
/// The returned guard flushes the decision log file and must be held until
/// the process exits.
pub fn init_tracing(cfg: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let (subscriber, guard) = build_subscriber(cfg)?;
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;
    Ok(guard)
}

fn build_subscriber(
    cfg: &LoggingConfig,
) -> Result<(impl Subscriber + Send + Sync + 'static, Option<WorkerGuard>)> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let console: Box<dyn Layer<Registry> + Send + Sync> = if cfg.json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    };

    let (decisions, guard) = match &cfg.decision_log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("decisions")
                .filename_suffix("log")
                .build(dir)
                .with_context(|| format!("cannot open decision log in {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer)
                .with_filter(Targets::new().with_target(DECISION_LOG_TARGET, LevelFilter::INFO));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(console.with_filter(filter))
        .with(decisions);
    Ok((subscriber, guard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{info, warn};

    #[test]
    fn test_decision_log_only_receives_decision_target() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LoggingConfig {
            decision_log_dir: Some(dir.path().to_path_buf()),
            json: false,
        };

        let (subscriber, guard) = build_subscriber(&cfg).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            info!(target: DECISION_LOG_TARGET, "Decision: SOC 96.0% >= 95.0%");
            warn!("gateway rejected session token");
        });
        drop(guard);

        let mut contents = String::new();
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            contents.push_str(&std::fs::read_to_string(entry.unwrap().path()).unwrap());
        }
        assert!(contents.contains("Decision: SOC 96.0% >= 95.0%"));
        assert!(!contents.contains("session token"));
    }

    #[test]
    fn test_no_decision_dir_means_no_guard() {
        let (_subscriber, guard) = build_subscriber(&LoggingConfig::default()).unwrap();
        assert!(guard.is_none());
    }
}
