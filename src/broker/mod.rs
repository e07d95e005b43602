use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;

/// Callback type for recording fetch metrics.
pub type MetricsCallback = Box<dyn Fn(&str, &str, Duration) + Send + Sync>;

/// Monitoring API client trait for one or more broker servers.
pub trait BrokerClient: Send + Sync {
    /// Fetch the general server status document (`/varz`).
    fn fetch_stats(
        &self,
        base_url: &str,
    ) -> impl std::future::Future<Output = Result<ServerStats>> + Send;

    /// Fetch the active connection list (`/connz`).
    fn fetch_connections(
        &self,
        base_url: &str,
    ) -> impl std::future::Future<Output = Result<ConnectionList>> + Send;
}

/// HTTP-based broker monitoring client, shared across all configured sources.
pub struct Client {
    http: reqwest::Client,
    metrics: Option<MetricsCallback>,
}

impl Client {
    /// Create a new monitoring client with the configured request timeout.
    ///
    /// The timeout is deliberately short; the poller runs on a tight
    /// interval and one unreachable source must not stall the cycle.
    pub fn new(cfg: &Config) -> Result<Self> {
        let timeout = if cfg.request_timeout.is_zero() {
            Duration::from_millis(300)
        } else {
            cfg.request_timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            metrics: None,
        })
    }

    /// Set a metrics callback for recording request stats.
    /// The callback receives (endpoint_name, status, duration).
    pub fn with_metrics(mut self, cb: MetricsCallback) -> Self {
        self.metrics = Some(cb);
        self
    }

    /// Record a request metric.
    fn record_request(&self, endpoint: &str, status: &str, duration: Duration) {
        if let Some(ref cb) = self.metrics {
            cb(endpoint, status, duration);
        }
    }

    /// Perform a GET request and deserialize the JSON response.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let start = Instant::now();
        let endpoint = endpoint_from_url(url);

        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?;

        let status_code = response.status();

        if !status_code.is_success() {
            let body = response.text().await.unwrap_or_default();
            self.record_request(endpoint, "error", start.elapsed());
            bail!("unexpected status {} from {}: {}", status_code, url, body);
        }

        let result: T = response
            .json()
            .await
            .with_context(|| format!("decoding response from {url}"))?;

        self.record_request(endpoint, "success", start.elapsed());

        Ok(result)
    }
}

impl BrokerClient for Client {
    async fn fetch_stats(&self, base_url: &str) -> Result<ServerStats> {
        debug!(source = base_url, "fetching server stats");

        let url = format!("{}/varz", base_url.trim_end_matches('/'));
        self.get_json(&url).await.context("fetching server stats")
    }

    async fn fetch_connections(&self, base_url: &str) -> Result<ConnectionList> {
        debug!(source = base_url, "fetching connection list");

        let url = format!("{}/connz", base_url.trim_end_matches('/'));
        self.get_json(&url)
            .await
            .context("fetching connection list")
    }
}

/// Extract a short endpoint name from a fetch URL.
fn endpoint_from_url(url: &str) -> &'static str {
    if url.ends_with("/varz") {
        "varz"
    } else if url.ends_with("/connz") {
        "connz"
    } else {
        "other"
    }
}

// --- JSON status documents ---

/// Cluster membership section of the general status document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterInfo {
    pub addr: String,
    pub cluster_port: u16,
}

/// General server status (`/varz`): identity and host fields, resource
/// usage, and the cumulative traffic counters the rate tracker consumes.
///
/// The four `*_sec` fields are zero as fetched; the poller fills them with
/// the derived rates before the record is forwarded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerStats {
    pub server_id: String,
    pub host: String,
    pub addr: String,
    pub http_host: String,
    pub cluster: ClusterInfo,
    pub start: String,
    pub now: Option<DateTime<Utc>>,
    pub uptime: String,
    pub mem: f64,
    pub cpu: f64,
    pub connections: u64,
    pub total_connections: u64,
    pub routes: u64,
    pub remotes: u64,
    pub in_msgs: u64,
    pub out_msgs: u64,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub slow_consumers: u64,
    pub subscriptions: u64,
    pub in_msgs_sec: f64,
    pub out_msgs_sec: f64,
    pub in_bytes_sec: f64,
    pub out_bytes_sec: f64,
}

/// One active client connection as reported by `/connz`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionStats {
    pub cid: u64,
    pub ip: String,
    pub port: u16,
    pub start: String,
    pub last_activity: String,
    pub uptime: String,
    pub pending_bytes: u64,
    pub in_msgs: u64,
    pub out_msgs: u64,
    pub in_bytes: u64,
    pub out_bytes: u64,
}

/// Active connection list (`/connz`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionList {
    pub now: String,
    pub num_connections: u64,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub connections: Vec<ConnectionStats>,
}
