//! Application state management for the exporter.
//!
//! This module defines the shared application state that is passed
//! to HTTP handlers and used by the background refresh task.

use chrono::{DateTime, Utc};
use listen_process_exporter::{HealthStats, ListenProcessCache, ProcessStatsCollector};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::metrics::ExporterMetrics;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests and background tasks.
pub struct AppState {
    pub registry: Registry,
    pub metrics: ExporterMetrics,
    pub cache: Arc<ListenProcessCache>,
    pub collector: ProcessStatsCollector,
    pub config: Arc<Config>,
    pub health_stats: Arc<HealthStats>,
    /// Cancelled on shutdown; scrape scans run under child tokens.
    pub shutdown: CancellationToken,
    pub started_at: DateTime<Utc>,
    pub hostname: String,
    pub scrape_timeout: Duration,
}
