//! Configuration for the smart meter exporter.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use smartmeter_common::{LoggingConfig, load_config};
use smartmeter_device::DeviceConfig;
use thiserror::Error;

use crate::scheduler::DEFAULT_INTERVAL_SECS;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] smartmeter_common::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Modem, credentials and link settings.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Scrape scheduling.
    #[serde(default)]
    pub scrape: ScrapeConfig,

    /// Metrics HTTP endpoint.
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scrape scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Seconds between scrape starts (minimum 10, default 60).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:9102").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:9102".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

impl HttpConfig {
    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen.parse().map_err(|e| {
            ConfigError::Validation(format!("invalid listen address '{}': {}", self.listen, e))
        })
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    ///
    /// Credentials may come from the command line or environment later, so
    /// only the file's syntax is checked here; call [`validate`](Self::validate)
    /// once all sources are merged.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Ok(load_config(path)?)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the merged configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        self.http.listen_addr()?;

        if !self.http.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "http.path must start with '/'".to_string(),
            ));
        }

        if self.http.path == "/health" || self.http.path == "/ready" {
            return Err(ConfigError::Validation(format!(
                "http.path '{}' collides with a built-in endpoint",
                self.http.path
            )));
        }

        Ok(())
    }
}
