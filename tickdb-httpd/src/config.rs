//! Configuration for the HTTP API service

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Configuration for the HTTP API service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpdConfig {
    /// Address to bind the HTTP server to
    pub bind_address: String,

    /// Require credentials on authenticated routes
    pub require_authentication: bool,

    /// Version string stamped on every response
    pub version: String,

    /// Detailed logging of write-path request bodies
    pub write_trace: bool,

    /// Maximum request body size in bytes
    pub max_request_size: usize,

    /// Long-poll wait settings
    pub wait: WaitConfig,
}

/// Settings for the wait-for-index long poll
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// Backend index poll interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for HttpdConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8086".to_string(),
            require_authentication: false,
            version: env!("CARGO_PKG_VERSION").to_string(),
            write_trace: false,
            max_request_size: 100 * 1024 * 1024,
            wait: WaitConfig::default(),
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
        }
    }
}

impl HttpdConfig {
    /// Load configuration from file, environment variables, and defaults
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            config = Self::load_from_file(&config_path)?;
        }

        if let Ok(bind_addr) = env::var("TICKDB_BIND_ADDRESS") {
            config.bind_address = bind_addr;
        }

        if let Ok(require_auth) = env::var("TICKDB_REQUIRE_AUTHENTICATION") {
            config.require_authentication = require_auth
                .parse()
                .context("TICKDB_REQUIRE_AUTHENTICATION must be true or false")?;
        }

        if let Ok(write_trace) = env::var("TICKDB_WRITE_TRACE") {
            config.write_trace = write_trace
                .parse()
                .context("TICKDB_WRITE_TRACE must be true or false")?;
        }

        if let Ok(max_request_size) = env::var("TICKDB_MAX_REQUEST_SIZE") {
            config.max_request_size = max_request_size.parse()?;
        }

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.bind_address.is_empty() {
            return Err(anyhow::anyhow!("Bind address cannot be empty"));
        }

        if self.max_request_size == 0 {
            return Err(anyhow::anyhow!("Max request size must be greater than 0"));
        }

        if self.wait.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("Wait poll interval must be greater than 0"));
        }

        Ok(())
    }
}

impl WaitConfig {
    /// Get the poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
