use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker;
use crate::config::Config;
use crate::health::HealthMetrics;
use crate::poller::Poller;
use crate::rate::RateTracker;
use crate::sink::http::HttpForwarder;
use crate::sink::stdout::StdoutForwarder;
use crate::sink::Forwarder;

/// How long stop() waits for the poll loop to wind down before giving up.
/// In-flight fetch and delivery requests are bounded by their own timeouts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Agent wires all components together: health server, broker client, rate
/// tracker, forwarders, and the polling loop.
pub struct Agent {
    cfg: Config,
    health: Arc<HealthMetrics>,
    poll_task: Option<tokio::task::JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent, initializing health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);

        Ok(Self {
            cfg,
            health,
            poll_task: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Start all components and begin polling.
    pub async fn start(&mut self) -> Result<()> {
        self.health
            .start()
            .await
            .context("starting health metrics server")?;

        let client = self.create_broker_client()?;

        let mut forwarders = Vec::new();

        if self.cfg.sink.enabled {
            let http = HttpForwarder::new(self.cfg.sink.clone())
                .context("creating HTTP forwarder")?;
            forwarders.push(Forwarder::Http(http));

            info!(url = %self.cfg.sink.url, "HTTP sink configured");
        }

        if self.cfg.stdout.enabled {
            forwarders.push(Forwarder::Stdout(StdoutForwarder::new()));

            info!("stdout sink configured");
        }

        if forwarders.is_empty() {
            warn!("no sinks configured, enriched records will be discarded");
        }

        let tracker = Arc::new(RateTracker::new());

        let poller = Poller::new(
            Arc::new(client),
            tracker,
            forwarders,
            Arc::clone(&self.health),
            &self.cfg,
        );

        let cancel = self.cancel.child_token();
        self.poll_task = Some(tokio::spawn(async move {
            poller.run(cancel).await;
        }));

        info!(
            sources = self.cfg.sources.len(),
            interval = ?self.cfg.interval,
            "agent fully started",
        );

        Ok(())
    }

    /// Gracefully stop all components.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(task) = self.poll_task.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "poll loop task failed"),
                Err(_) => warn!("poll loop did not stop within grace period, abandoning"),
            }
        }

        self.health.stop().await?;

        Ok(())
    }

    /// Create a broker monitoring client with metrics callback.
    fn create_broker_client(&self) -> Result<broker::Client> {
        let client = broker::Client::new(&self.cfg).context("creating broker client")?;

        let health = Arc::clone(&self.health);
        let client = client.with_metrics(Box::new(move |endpoint, status, duration| {
            health
                .fetch_requests_total
                .with_label_values(&[endpoint, status])
                .inc();
            health
                .fetch_request_duration
                .with_label_values(&[endpoint])
                .observe(duration.as_secs_f64());
        }));

        Ok(client)
    }
}
