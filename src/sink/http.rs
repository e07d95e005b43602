use anyhow::{bail, Context, Result};

use crate::config::SinkConfig;

use super::EnrichedRecord;

/// HTTP forwarder: POSTs each JSON-serialized record to the sink endpoint
/// with basic credentials.
///
/// Delivery is fire-and-forget per record. A non-2xx acknowledgment or a
/// transport error surfaces as an error and the record is lost; metrics
/// loss on sink unavailability is accepted over durability machinery.
pub struct HttpForwarder {
    client: reqwest::Client,
    cfg: SinkConfig,
}

impl HttpForwarder {
    /// Create a new HTTP forwarder for the configured sink.
    pub fn new(cfg: SinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("building sink HTTP client")?;

        Ok(Self { client, cfg })
    }

    /// Returns the forwarder name for logging.
    pub fn name(&self) -> &str {
        "http"
    }

    /// Deliver one record to the sink.
    pub async fn forward(&self, record: &EnrichedRecord) -> Result<()> {
        let mut request = self.client.post(&self.cfg.url).json(record);

        if !self.cfg.username.is_empty() {
            request = request.basic_auth(&self.cfg.username, Some(&self.cfg.password));
        }

        let response = request
            .send()
            .await
            .context("sending record to sink")?;

        let status = response.status();
        // Drain body for connection reuse.
        let _ = response.bytes().await;

        if !status.is_success() {
            bail!("sink returned unexpected status: {status}");
        }

        Ok(())
    }
}
