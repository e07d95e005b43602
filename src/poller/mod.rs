use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{BrokerClient, ConnectionList, ServerStats};
use crate::config::Config;
use crate::health::HealthMetrics;
use crate::rate::{RateTracker, Snapshot};
use crate::sink::{EnrichedRecord, Forwarder};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Drives the polling loop: per cycle, every configured source is fetched,
/// enriched with derived rates, and handed to every forwarder.
///
/// Sources are polled with bounded fan-out (one task per source, limited by
/// a semaphore) and joined before the cycle sleep, so cycle latency is
/// bounded by the slowest in-flight batch rather than the sum of all
/// source timeouts. Delivery order across sources is not guaranteed.
pub struct Poller<C> {
    client: Arc<C>,
    tracker: Arc<RateTracker>,
    forwarders: Arc<Vec<Forwarder>>,
    health: Arc<HealthMetrics>,
    sources: Arc<Vec<String>>,
    interval: Duration,
    fanout: Arc<Semaphore>,
}

impl<C> Poller<C>
where
    C: BrokerClient + 'static,
{
    pub fn new(
        client: Arc<C>,
        tracker: Arc<RateTracker>,
        forwarders: Vec<Forwarder>,
        health: Arc<HealthMetrics>,
        cfg: &Config,
    ) -> Self {
        Self {
            client,
            tracker,
            forwarders: Arc::new(forwarders),
            health,
            sources: Arc::new(cfg.sources.clone()),
            interval: cfg.interval,
            fanout: Arc::new(Semaphore::new(cfg.max_concurrent_polls)),
        }
    }

    /// Run polling cycles until cancelled. The first cycle starts
    /// immediately; each subsequent cycle starts one interval after the
    /// previous one finished.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            sources = self.sources.len(),
            interval = ?self.interval,
            "poller started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("poller stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
    }

    /// Poll every configured source once.
    ///
    /// Per-source failures are contained here: a failed fetch or delivery
    /// is logged and counted, the source is skipped for this cycle, and
    /// the cycle carries on with the remaining sources.
    pub async fn run_cycle(&self) {
        let started = Instant::now();
        let mut tasks = JoinSet::new();

        for source in self.sources.iter() {
            let source = source.clone();
            let client = Arc::clone(&self.client);
            let tracker = Arc::clone(&self.tracker);
            let forwarders = Arc::clone(&self.forwarders);
            let health = Arc::clone(&self.health);
            let fanout = Arc::clone(&self.fanout);

            tasks.spawn(async move {
                let _permit = match fanout.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                poll_source(&*client, &tracker, &forwarders, &health, &source).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "poll task join failed");
            }
        }

        self.health
            .sources_tracked
            .set(self.tracker.tracked_sources() as f64);
        self.health
            .cycle_duration
            .observe(started.elapsed().as_secs_f64());
    }
}

/// Fetch, enrich, and forward one source for one cycle.
async fn poll_source<C: BrokerClient>(
    client: &C,
    tracker: &RateTracker,
    forwarders: &[Forwarder],
    health: &HealthMetrics,
    source: &str,
) {
    let stats = match client.fetch_stats(source).await {
        Ok(stats) => stats,
        Err(e) => {
            warn!(source, error = %e, "stats fetch failed, skipping source this cycle");
            health.polls_total.with_label_values(&[source, "error"]).inc();
            return;
        }
    };

    let connections = match client.fetch_connections(source).await {
        Ok(connections) => connections,
        Err(e) => {
            warn!(source, error = %e, "connection fetch failed, skipping source this cycle");
            health.polls_total.with_label_values(&[source, "error"]).inc();
            return;
        }
    };

    health
        .polls_total
        .with_label_values(&[source, "success"])
        .inc();

    let record = enrich(tracker, source, stats, connections);

    for forwarder in forwarders {
        match forwarder.forward(&record).await {
            Ok(()) => {
                health
                    .forwards_total
                    .with_label_values(&[forwarder.name(), "success"])
                    .inc();
                health.records_forwarded.inc();
                debug!(source, sink = forwarder.name(), "record delivered");
            }
            Err(e) => {
                warn!(
                    source,
                    sink = forwarder.name(),
                    error = %e,
                    "delivery failed, dropping record",
                );
                health
                    .forwards_total
                    .with_label_values(&[forwarder.name(), "error"])
                    .inc();
            }
        }
    }
}

/// Merge derived rates into the status document and normalize units to the
/// sink contract.
fn enrich(
    tracker: &RateTracker,
    source: &str,
    mut stats: ServerStats,
    connections: ConnectionList,
) -> EnrichedRecord {
    // Prefer the source's own clock; fall back to receive time if the
    // document carries no timestamp.
    let taken_at = stats.now.unwrap_or_else(Utc::now);

    let sample = tracker.compute(
        source,
        Snapshot {
            in_msgs: stats.in_msgs,
            out_msgs: stats.out_msgs,
            in_bytes: stats.in_bytes,
            out_bytes: stats.out_bytes,
            taken_at,
        },
    );

    stats.in_msgs_sec = sample.in_msgs_sec;
    stats.out_msgs_sec = sample.out_msgs_sec;
    stats.in_bytes_sec = sample.in_bytes_sec;
    stats.out_bytes_sec = sample.out_bytes_sec;

    // The sink expects memory in MiB; the source reports bytes.
    stats.mem /= BYTES_PER_MIB;

    EnrichedRecord { stats, connections }
}
