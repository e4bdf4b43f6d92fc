//! HTTP endpoint handlers for the exporter.
//!
//! This module provides handlers for all HTTP endpoints:
//! - `/metrics`: Prometheus metrics for the configured or requested port
//! - `/probe`: Prometheus metrics for an explicit `target` port
//! - `/refresh_listen_process`: Refresh and dump the listen port snapshot
//! - `/health`: Health check endpoint
//! - `/` and `/doc`: Landing page and documentation

pub mod doc;
pub mod health;
pub mod metrics;
pub mod refresh;

// Re-export handlers
pub use doc::{doc_handler, index_handler};
pub use health::health_handler;
pub use metrics::{metrics_handler, probe_handler};
pub use refresh::refresh_handler;
