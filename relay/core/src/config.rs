//! Dispatcher Configuration
//!
//! Settings for the inference server connection and the scheduling loop.
//! Built from defaults, environment variables, or a TOML document; the
//! daemon decides where that document comes from.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Default Ollama port
pub const DEFAULT_PORT: u16 = 11434;

/// Dispatcher configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Inference server host
    pub host: String,
    /// Inference server port
    pub port: u16,
    /// Maximum attempts executing at the same time
    pub max_concurrent_requests: usize,
    /// Whether failed requests are retried at all
    pub auto_retry_enabled: bool,
    /// Generation options applied under every request's own options
    pub global_options: Map<String, Value>,
    /// Upper bound on how long the scheduler sleeps between checks
    pub queue_poll_interval_ms: u64,
    /// Timeout for the startup `/api/version` probe
    pub probe_timeout_ms: u64,
    /// Timeout for the `/api/tags` catalog fetch
    pub catalog_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            max_concurrent_requests: 3,
            auto_retry_enabled: true,
            global_options: Map::new(),
            queue_poll_interval_ms: 100,
            probe_timeout_ms: 5_000,
            catalog_timeout_ms: 10_000,
        }
    }
}

impl DispatcherConfig {
    /// Create configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let host = std::env::var("OLLAMA_HOST")
            .or_else(|_| std::env::var("RELAY_OLLAMA_HOST"))
            .unwrap_or(defaults.host);
        let port: u16 = std::env::var("OLLAMA_PORT")
            .or_else(|_| std::env::var("RELAY_OLLAMA_PORT"))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        Self {
            host,
            port,
            max_concurrent_requests: std::env::var("RELAY_MAX_CONCURRENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_requests),
            auto_retry_enabled: std::env::var("RELAY_AUTO_RETRY")
                .map(|v| v != "0" && v.to_lowercase() != "false")
                .unwrap_or(defaults.auto_retry_enabled),
            queue_poll_interval_ms: std::env::var("RELAY_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.queue_poll_interval_ms),
            ..defaults
        }
    }

    /// Parse configuration from a TOML document; missing keys take defaults
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Base URL of the inference server
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Scheduler poll interval
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms.max(1))
    }

    /// Startup probe timeout
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Catalog fetch timeout
    #[must_use]
    pub fn catalog_timeout(&self) -> Duration {
        Duration::from_millis(self.catalog_timeout_ms)
    }
}
