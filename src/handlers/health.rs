//! Health check endpoint handler.
//!
//! This module provides the `/health` endpoint handler that returns
//! exporter health statistics and the state of the listen port cache.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");

    let last_refresh = state.cache.last_refresh();

    // Derive HTTP status from cache state
    let (status, message) = match last_refresh {
        Some(_) => (StatusCode::OK, "OK"),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Listen process cache not refreshed yet",
        ),
    };

    let refreshed = match last_refresh {
        Some(t) => format!("{:.1}s ago", t.elapsed().as_secs_f64()),
        None => "never".to_string(),
    };

    let interval = match state.cache.interval().period() {
        Some(d) => format!("{}s", d.as_secs()),
        None => "disabled".to_string(),
    };

    let body = format!(
        "{message}\n\n\
         version: {}\n\
         hostname: {}\n\
         started at: {}\n\
         refresh interval: {interval}\n\
         last refresh: {refreshed}\n\
         cached listen ports: {}\n\n\
         {}",
        env!("CARGO_PKG_VERSION"),
        state.hostname,
        state.started_at.to_rfc3339(),
        state.cache.snapshot().len(),
        state.health_stats.render_table(),
    );

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        body,
    )
}
