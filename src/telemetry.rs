//! Logging setup
//!
//! Two sinks:
//! - Console logs on stderr (compact, human-readable), so stdout stays free
//!   for events
//! - JSON file logs, rotated daily (for analysis)

use crate::config::TelemetryConfig;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "analyst_agent.log";

/// Keeps the file writer alive; logs are flushed when this is dropped
pub struct Telemetry {
    log_dir: PathBuf,
    _file_guard: WorkerGuard,
}

impl Telemetry {
    pub fn log_dir(&self) -> &PathBuf {
        &self.log_dir
    }
}

/// Filter used when `RUST_LOG` is not set
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug,hyper=info,reqwest=info,h2=info,rustls=info"
    } else {
        "info,hyper=warn,reqwest=warn,h2=warn,rustls=warn"
    }
}

/// Install the global subscriber. Hold the returned value for the lifetime of
/// the program.
pub fn init(config: &TelemetryConfig) -> anyhow::Result<Telemetry> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(config.verbose)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).compact().with_writer(std::io::stderr))
        .with(fmt::layer().json().with_writer(non_blocking))
        .try_init()
        .ok();

    tracing::info!(
        log_dir = %config.log_dir.display(),
        verbose = config.verbose,
        "Telemetry initialized"
    );

    Ok(Telemetry {
        log_dir: config.log_dir.clone(),
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_creates_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = TelemetryConfig {
            log_dir: dir.path().join("logs"),
            verbose: false,
        };
        let telemetry = init(&config).unwrap();
        assert!(telemetry.log_dir().is_dir());
    }

    #[test]
    fn test_default_filter_quiets_http_stack() {
        assert!(default_filter(false).starts_with("info"));
        assert!(default_filter(true).starts_with("debug"));
        assert!(default_filter(false).contains("reqwest=warn"));
    }
}
