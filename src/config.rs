use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the brokerpulse agent.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    #[allow(dead_code)]
    pub log_level: String,

    /// Sleep between full polling cycles. Default: 2s.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Per-request timeout for source fetches. Default: 300ms.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Maximum sources polled concurrently within one cycle. Default: 4.
    #[serde(default = "default_max_concurrent_polls")]
    pub max_concurrent_polls: usize,

    /// Base URLs of the monitored broker servers; `/varz` and `/connz` are
    /// appended per source.
    #[serde(default)]
    pub sources: Vec<String>,

    /// HTTP delivery sink configuration.
    #[serde(default)]
    pub sink: SinkConfig,

    /// Console forwarder configuration.
    #[serde(default)]
    pub stdout: StdoutConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// HTTP delivery sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Enable the HTTP sink. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Sink endpoint receiving the JSON-serialized records.
    #[serde(default)]
    pub url: String,

    /// HTTP basic auth username.
    #[serde(default)]
    pub username: String,

    /// HTTP basic auth password.
    #[serde(default)]
    pub password: String,

    /// Delivery request timeout. Default: 5s.
    #[serde(default = "default_sink_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Console forwarder configuration.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct StdoutConfig {
    /// Print every enriched record to stdout. Default: false.
    #[serde(default)]
    pub enabled: bool,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    /// Listen address. Default: ":9095".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_request_timeout() -> Duration {
    Duration::from_millis(300)
}

fn default_max_concurrent_polls() -> usize {
    4
}

fn default_sink_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_health_addr() -> String {
    ":9095".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            interval: default_interval(),
            request_timeout: default_request_timeout(),
            max_concurrent_polls: default_max_concurrent_polls(),
            sources: Vec::new(),
            sink: SinkConfig::default(),
            stdout: StdoutConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            username: String::new(),
            password: String::new(),
            timeout: default_sink_timeout(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            addr: default_health_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            bail!("at least one source is required");
        }

        for source in &self.sources {
            if source.trim().is_empty() {
                bail!("source URLs must not be empty");
            }
        }

        if self.interval.is_zero() {
            bail!("interval must be positive");
        }

        if self.max_concurrent_polls == 0 {
            bail!("max_concurrent_polls must be positive");
        }

        if self.sink.enabled && self.sink.url.is_empty() {
            bail!("sink.url is required when the sink is enabled");
        }

        Ok(())
    }
}
