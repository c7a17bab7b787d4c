//! Run configuration
//!
//! Settings come from an optional `pump-scan.toml` in the working directory,
//! overridden by environment variables (`LIMIT`, `TARGET`, ...). Keys are
//! matched case-insensitively.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::application::orchestrator::OrchestratorConfig;
use crate::application::plan::BatchPlan;
use crate::infrastructure::browser::BrowserOptions;
use crate::infrastructure::logging::LoggingConfig;

/// Optional config file stem, resolved in the working directory.
pub const CONFIG_FILE_STEM: &str = "pump-scan";

/// Default values for all settings
pub mod defaults {
    pub const LIMIT: usize = 30;
    pub const TARGET: usize = 90;
    pub const REQUEST_HANDLER_TIMEOUT_SECS: u64 = 300;
    pub const MAX_CONCURRENCY: usize = 3;
    pub const SCROLL_DELAY_MS: u64 = 1000;
    pub const NETWORK_IDLE_TIMEOUT_SECS: u64 = 30;
    pub const SAFETY_MULTIPLIER: usize = 2;
    pub const SCAN_URL: &str = "https://pump.fun/advanced/scan";
    pub const RESPONSE_URL_MARKER: &str = "list?sortBy=creationTime";
    pub const OUTPUT_PATH: &str = "out.json";
    pub const HEADLESS: bool = true;
    pub const LOG_LEVEL: &str = "info";
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Records requested per batch
    pub limit: usize,

    /// Unique records wanted before stopping
    pub target: usize,

    /// Per-attempt timeout in seconds, 0 disables it
    pub request_handler_timeout_secs: u64,

    /// Concurrent batch attempts
    pub max_concurrency: usize,

    /// Settle delay after navigation in milliseconds
    pub scroll_delay_ms: u64,

    /// Longest wait for network idle after navigation, in seconds
    pub network_idle_timeout_secs: u64,

    /// Extra batches scheduled on top of `ceil(target / limit)`
    pub safety_multiplier: usize,

    pub scan_url: String,

    /// Substring identifying intercepted listing responses
    pub response_url_marker: String,

    pub output_path: PathBuf,

    pub headless: bool,

    pub log_level: String,

    pub log_json: bool,

    /// Also write logs to a daily file in this directory
    pub log_dir: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            limit: defaults::LIMIT,
            target: defaults::TARGET,
            request_handler_timeout_secs: defaults::REQUEST_HANDLER_TIMEOUT_SECS,
            max_concurrency: defaults::MAX_CONCURRENCY,
            scroll_delay_ms: defaults::SCROLL_DELAY_MS,
            network_idle_timeout_secs: defaults::NETWORK_IDLE_TIMEOUT_SECS,
            safety_multiplier: defaults::SAFETY_MULTIPLIER,
            scan_url: defaults::SCAN_URL.to_string(),
            response_url_marker: defaults::RESPONSE_URL_MARKER.to_string(),
            output_path: PathBuf::from(defaults::OUTPUT_PATH),
            headless: defaults::HEADLESS,
            log_level: defaults::LOG_LEVEL.to_string(),
            log_json: false,
            log_dir: None,
        }
    }
}

impl ScanConfig {
    /// Load from `pump-scan.toml` (optional) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_sources(
            config::File::with_name(CONFIG_FILE_STEM).required(false),
            config::Environment::default(),
        )
    }

    pub fn from_sources(
        file: config::File<config::FileSourceFile, config::FileFormat>,
        environment: config::Environment,
    ) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(environment.try_parsing(true))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the run cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("LIMIT", self.limit),
            ("TARGET", self.target),
            ("MAX_CONCURRENCY", self.max_concurrency),
            ("SAFETY_MULTIPLIER", self.safety_multiplier),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation {
                    message: format!("{name} must be greater than 0"),
                });
            }
        }

        if BatchPlan::attempt_count(self.target, self.limit, self.safety_multiplier).is_none() {
            return Err(ConfigError::Validation {
                message: format!(
                    "SAFETY_MULTIPLIER {} is too large for TARGET {} and LIMIT {}",
                    self.safety_multiplier, self.target, self.limit
                ),
            });
        }

        self.scan_url()?;

        if self.response_url_marker.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "RESPONSE_URL_MARKER must not be empty".to_string(),
            });
        }

        Ok(())
    }

    pub fn scan_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.scan_url).map_err(|e| ConfigError::Validation {
            message: format!("SCAN_URL '{}' is not a valid URL: {e}", self.scan_url),
        })
    }

    pub const fn request_handler_timeout(&self) -> Option<Duration> {
        match self.request_handler_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.scroll_delay_ms)
    }

    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, ConfigError> {
        Ok(OrchestratorConfig {
            scan_url: self.scan_url()?,
            batch_size: self.limit,
            target: self.target,
            safety_multiplier: self.safety_multiplier,
            max_concurrency: self.max_concurrency,
            settle_delay: self.settle_delay(),
            request_handler_timeout: self.request_handler_timeout(),
            response_url_marker: self.response_url_marker.clone(),
        })
    }

    pub fn browser_options(&self) -> BrowserOptions {
        BrowserOptions {
            headless: self.headless,
            response_url_marker: self.response_url_marker.clone(),
            network_idle_timeout: Duration::from_secs(self.network_idle_timeout_secs),
        }
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            json_format: self.log_json,
            log_dir: self.log_dir.clone(),
            ..LoggingConfig::default()
        }
    }

    pub fn log_summary(&self) {
        info!(
            "Config: limit={}, target={}, max_concurrency={}, timeout={}s, settle={}ms, idle_wait={}s, multiplier={}",
            self.limit,
            self.target,
            self.max_concurrency,
            self.request_handler_timeout_secs,
            self.scroll_delay_ms,
            self.network_idle_timeout_secs,
            self.safety_multiplier
        );
        info!("Scan URL: {} (marker: {})", self.scan_url, self.response_url_marker);
        info!("Output path: {}", self.output_path.display());
    }
}
