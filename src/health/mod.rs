use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Prometheus metrics for agent health and observability.
///
/// All metrics use the "brokerpulse" namespace.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Source polls by source and outcome.
    pub polls_total: CounterVec,
    /// Fetch requests by endpoint (varz/connz) and outcome.
    pub fetch_requests_total: CounterVec,
    /// Fetch request duration by endpoint.
    pub fetch_request_duration: HistogramVec,
    /// Record deliveries by sink and outcome.
    pub forwards_total: CounterVec,
    /// Total records delivered across all sinks.
    pub records_forwarded: Counter,
    /// Number of sources with retained rate state.
    pub sources_tracked: Gauge,
    /// Full polling cycle duration.
    pub cycle_duration: Histogram,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let polls_total = CounterVec::new(
            Opts::new("polls_total", "Total source polls by source and outcome.")
                .namespace("brokerpulse"),
            &["source", "status"],
        )?;
        let fetch_requests_total = CounterVec::new(
            Opts::new(
                "fetch_requests_total",
                "Total monitoring endpoint fetches by endpoint and outcome.",
            )
            .namespace("brokerpulse"),
            &["endpoint", "status"],
        )?;
        let fetch_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "fetch_request_duration_seconds",
                "Monitoring endpoint fetch duration by endpoint.",
            )
            .namespace("brokerpulse")
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
            &["endpoint"],
        )?;
        let forwards_total = CounterVec::new(
            Opts::new(
                "forwards_total",
                "Total record deliveries by sink and outcome.",
            )
            .namespace("brokerpulse"),
            &["sink", "status"],
        )?;
        let records_forwarded = Counter::with_opts(
            Opts::new(
                "records_forwarded_total",
                "Total records delivered across all sinks.",
            )
            .namespace("brokerpulse"),
        )?;
        let sources_tracked = Gauge::with_opts(
            Opts::new(
                "sources_tracked",
                "Number of sources with retained rate state.",
            )
            .namespace("brokerpulse"),
        )?;
        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new("cycle_duration_seconds", "Full polling cycle duration.")
                .namespace("brokerpulse")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(polls_total.clone()))?;
        registry.register(Box::new(fetch_requests_total.clone()))?;
        registry.register(Box::new(fetch_request_duration.clone()))?;
        registry.register(Box::new(forwards_total.clone()))?;
        registry.register(Box::new(records_forwarded.clone()))?;
        registry.register(Box::new(sources_tracked.clone()))?;
        registry.register(Box::new(cycle_duration.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            polls_total,
            fetch_requests_total,
            fetch_request_duration,
            forwards_total,
            records_forwarded,
            sources_tracked,
            cycle_duration,
        })
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":9095"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let registry = self.registry.clone();
        let app_state = Arc::new(AppState { registry });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the health metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "encoding metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "encoding error".to_string(),
        );
    }

    match String::from_utf8(buffer) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "converting metrics to string");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
