//! Logging system configuration and initialization
//!
//! - Console output on stderr
//! - Optional daily log file (non-blocking writer)
//! - Optional JSON formatted lines
//! - `RUST_LOG` overrides the configured level

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use chrono::Utc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer as _, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub const LOG_FILE_PREFIX: &str = "pump-scan.log";

/// Logging configuration settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Also write a daily rotated log file here
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            log_dir: None,
        }
    }
}

/// Keeps the non-blocking file writer alive; hold it until the process exits.
#[must_use]
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// UTC timestamps with millisecond precision
struct UtcTimeFormatter;

impl FormatTime for UtcTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Utc::now().format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise the configured level with
/// browser protocol chatter suppressed unless tracing.
pub fn build_env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(level).map_err(|e| anyhow!("Invalid log level '{}': {}", level, e))?;

    if !level.to_lowercase().contains("trace") {
        for directive in ["chromiumoxide=warn", "tungstenite=warn", "async_tungstenite=warn"] {
            filter = filter.add_directive(directive.parse()?);
        }
    }

    Ok(filter)
}

type BoxedLayer = Box<dyn tracing_subscriber::Layer<Registry> + Send + Sync>;

/// Initialize the global subscriber.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard> {
    if !config.console_output && config.log_dir.is_none() {
        return Err(anyhow!("No logging output configured"));
    }

    let env_filter = build_env_filter(&config.level)?;
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.console_output {
        let console_layer = fmt::Layer::new()
            .with_writer(std::io::stderr)
            .with_timer(UtcTimeFormatter)
            .with_target(false);
        layers.push(if config.json_format {
            console_layer.json().boxed()
        } else {
            console_layer.boxed()
        });
    }

    let mut file_guard = None;
    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", dir, e))?;
        let (writer, guard) = non_blocking(rolling::daily(dir, LOG_FILE_PREFIX));
        file_guard = Some(guard);

        // No ANSI color codes for file output
        let file_layer = fmt::Layer::new()
            .with_writer(writer)
            .with_timer(UtcTimeFormatter)
            .with_target(true)
            .with_ansi(false);
        layers.push(if config.json_format {
            file_layer.json().boxed()
        } else {
            file_layer.boxed()
        });
    }

    Registry::default().with(layers).with(env_filter).try_init()?;

    info!("Logging system initialized (level: {}, json: {})", config.level, config.json_format);
    if let Some(dir) = &config.log_dir {
        info!("Log directory: {:?}", dir);
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Log system information for diagnostics
pub fn log_system_info() {
    info!("=== pump-scan v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);

    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {:?}", current_dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.console_output);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(build_env_filter("pump_scan=loud").is_err());
    }

    #[test]
    fn test_no_output_is_an_error() {
        let config = LoggingConfig {
            console_output: false,
            log_dir: None,
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config).is_err());
    }
}
