//! Metrics and probe endpoint handlers for Prometheus scraping.
//!
//! This module resolves the owner of the requested listen port, collects
//! its statistics and returns them in Prometheus text format together
//! with the exporter's own metrics.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use listen_process_exporter::{ExporterError, ListenProcess, ProcessStatistics};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Deserialize;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::metrics::ProcessMetrics;
use crate::state::{AppState, SharedState};

/// Buffer capacity for metrics encoding.
const BUFFER_CAP: usize = 16 * 1024;

/// `?target=<port>` query of the scrape endpoints.
#[derive(Debug, Deserialize)]
pub struct TargetQuery {
    pub target: Option<String>,
}

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    MissingTarget,
    InvalidTarget(String),
    EncodingFailed,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        match self {
            MetricsError::MissingTarget => {
                (StatusCode::BAD_REQUEST, "target is required".to_string()).into_response()
            }
            MetricsError::InvalidTarget(t) => (
                StatusCode::BAD_REQUEST,
                format!("target[{}] must be number", t),
            )
                .into_response(),
            MetricsError::EncodingFailed => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
            }
        }
    }
}

/// Parses a `target` query value into a port.
pub fn parse_target(target: &str) -> Result<u16, MetricsError> {
    target
        .trim()
        .parse::<u16>()
        .map_err(|_| MetricsError::InvalidTarget(target.to_string()))
}

/// Handler for the metrics endpoint; falls back to the configured target port.
#[instrument(skip(state))]
pub async fn metrics_handler(
    State(state): State<SharedState>,
    Query(query): Query<TargetQuery>,
) -> Result<String, MetricsError> {
    let port = match query.target.as_deref() {
        Some(t) => parse_target(t)?,
        None => state.config.target_port(),
    };
    scrape(&state, port).await
}

/// Handler for the /probe endpoint; the target is mandatory.
#[instrument(skip(state))]
pub async fn probe_handler(
    State(state): State<SharedState>,
    Query(query): Query<TargetQuery>,
) -> Result<String, MetricsError> {
    let target = query
        .target
        .filter(|t| !t.is_empty())
        .ok_or(MetricsError::MissingTarget)?;
    let port = parse_target(&target)?;
    scrape(&state, port).await
}

async fn scrape(state: &SharedState, port: u16) -> Result<String, MetricsError> {
    let start = Instant::now();
    debug!("Processing scrape for listen port {}", port);

    // Bound a scan triggered by a cache miss to the scrape timeout.
    let token = state.shutdown.child_token();
    let deadline = {
        let token = token.clone();
        let timeout = state.scrape_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            token.cancel();
        })
    };

    let bg_state = state.clone();
    let collected =
        tokio::task::spawn_blocking(move || collect_target(&bg_state, port, &token)).await;
    deadline.abort();

    let collected = match collected {
        Ok(c) => c,
        Err(e) => {
            error!("Collection task failed: {}", e);
            state.metrics.scrape_errors.inc();
            None
        }
    };

    let registry = Registry::new();
    if let Some((listen, stats)) = &collected {
        let process_metrics = ProcessMetrics::new(&registry).map_err(|e| {
            error!("Failed to register process metrics: {}", e);
            MetricsError::EncodingFailed
        })?;
        process_metrics.set_for_process(listen, stats);
    }

    state
        .metrics
        .listening_ports
        .set(state.cache.snapshot().len() as f64);
    state
        .metrics
        .refresh_duration
        .set(state.health_stats.last_scan_duration_seconds());
    state.metrics.scrape_duration.set(start.elapsed().as_secs_f64());

    let mut families = state.registry.gather();
    families.extend(registry.gather());

    let mut buffer = Vec::with_capacity(BUFFER_CAP);
    if TextEncoder::new().encode(&families, &mut buffer).is_err() {
        error!("Failed to encode Prometheus metrics");
        return Err(MetricsError::EncodingFailed);
    }

    let duration = start.elapsed().as_secs_f64();
    state.health_stats.record_scrape(duration);
    debug!(
        "Scrape for listen port {} completed: {} bytes, {:.3}ms",
        port,
        buffer.len(),
        duration * 1000.0
    );

    String::from_utf8(buffer).map_err(|_| MetricsError::EncodingFailed)
}

/// Resolves and collects one target, counting failures in the scrape error
/// metrics. Runs on the blocking pool.
fn collect_target(
    state: &AppState,
    port: u16,
    token: &CancellationToken,
) -> Option<(ListenProcess, ProcessStatistics)> {
    let listen = match state.cache.lookup_with(port, token) {
        Ok(p) => p,
        Err(ExporterError::NotFound(_)) => {
            warn!("listen port {} not found", port);
            state.metrics.scrape_errors.inc();
            return None;
        }
        Err(e) => {
            error!("query listen port {} error: {}", port, e);
            state.metrics.scrape_errors.inc();
            return None;
        }
    };

    if !listen.is_attributed() {
        warn!("listen port {} has no resolvable pid", port);
        state.metrics.scrape_errors.inc();
        return None;
    }

    match state.collector.collect(listen.pid) {
        Ok(stats) => {
            if stats.partial_errors > 0 {
                debug!(
                    "listen port {} pid {}: {} partial read errors",
                    port, listen.pid, stats.partial_errors
                );
                state.metrics.scrape_partial_errors.inc();
            }
            Some((listen, stats))
        }
        Err(e) => {
            warn!("query listen port {} pid {} error: {}", port, listen.pid, e);
            state.metrics.scrape_procread_errors.inc();
            None
        }
    }
}
