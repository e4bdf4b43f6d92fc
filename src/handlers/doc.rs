//! Landing page and documentation endpoint handlers.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for `/`, linking the metrics endpoint.
#[instrument(skip(state))]
pub async fn index_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing / request");

    let metrics_path = state.config.metrics_path();
    let page = format!(
        r#"<html>
<head><title>Listen Process Exporter</title></head>
<body>
<h1>Listen Process Exporter</h1>
<p><a href="{metrics_path}">Metrics</a></p>
<p><a href="/probe?target={target}">Probe port {target}</a></p>
<p><a href="/refresh_listen_process">Refresh listen processes</a></p>
<p><a href="/doc">Documentation</a></p>
</body>
</html>
"#,
        target = state.config.target_port(),
    );

    (
        StatusCode::OK,
        [("Content-Type", "text/html; charset=utf-8")],
        page,
    )
}

/// Handler for the /doc endpoint.
#[instrument(skip(state))]
pub async fn doc_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /doc request");

    let version = env!("CARGO_PKG_VERSION");
    let metrics_path = state.config.metrics_path();
    let target = state.config.target_port();
    let doc = format!(
        r#"LISTEN PROCESS EXPORTER - DOCUMENTATION
=======================================

VERSION: {version}
DESCRIPTION: Prometheus exporter for the process owning a TCP listening port

HTTP ENDPOINTS
--------------
GET {metrics_path}?target=PORT   - Metrics for PORT (default {target})
GET /probe?target=PORT           - Metrics for PORT, target required
GET /refresh_listen_process      - Rescan listening ports, return snapshot as JSON
GET /health                      - Health check with internal statistics (plain text)
GET /doc                         - This documentation (plain text)

AVAILABLE METRICS
-----------------
Labels: listen_port, pid

listen_port_process_thread_count                 - Threads of the listen process
listen_port_process_cpu_seconds_total            - CPU time, mode=user|system
listen_port_process_read_bytes_total             - Bytes read from storage
listen_port_process_read_calls_total             - Read syscalls
listen_port_process_write_bytes_total            - Bytes written to storage
listen_port_process_write_calls_total            - Write syscalls
listen_port_process_major_page_faults_total      - Major page faults
listen_port_process_minor_page_faults_total      - Minor page faults
listen_port_process_context_switches_total       - ctx_switch_type=voluntary|nonvoluntary
listen_port_process_memory_bytes                 - memory_type=resident|virtual|swapped
listen_port_process_open_file_desc               - Open file descriptors
listen_port_process_oldest_start_time_seconds    - Start time since the epoch

listen_port_process_scrape_errors                - Scrapes without process metrics
listen_port_process_scrape_procread_errors       - Failed process statistics reads
listen_port_process_scrape_partial_errors        - Partially failed statistics reads
listen_port_process_refresh_duration_seconds     - Duration of the last listen port scan
listen_port_process_listening_ports              - Ports in the current snapshot
listen_port_process_scrape_duration_seconds      - Duration of the last scrape

CONFIGURATION
-------------
Config file locations (first existing wins):
1. CLI specified: -c /path/to/config.yaml
2. /etc/listen-process-exporter/config.{{yaml,yml,json,toml}}
3. ./listen-process-exporter.{{yaml,yml,json}}

Key configuration options:
- port: HTTP listen port (default: 9911)
- bind: Bind address (default: 0.0.0.0)
- metrics_path: Metrics endpoint path (default: /metrics)
- target_port: Port collected without ?target= (default: 3306)
- refresh_interval: Seconds between listen port scans, minimum 5, -1 disables (default: 60)
- proc_root: Proc filesystem root (default: /proc)
- scrape_timeout_ms: Bound for a scan triggered by a scrape (default: 10000)

CLI COMMANDS
------------
listen-process-exporter                       - Start the exporter
listen-process-exporter check --all           - Validate system requirements
listen-process-exporter config -o config.yaml - Generate config file
listen-process-exporter scan                  - Print listening ports and owners
listen-process-exporter scan --port 3306      - Print one owner and its statistics
listen-process-exporter --help                - Show all CLI options

PROMETHEUS SCRAPE CONFIG
------------------------
scrape_configs:
  - job_name: 'listen-process'
    metrics_path: /probe
    static_configs:
      - targets: ['3306', '6379']
    relabel_configs:
      - source_labels: [__address__]
        target_label: __param_target
      - target_label: __address__
        replacement: localhost:9911
"#
    );

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        doc,
    )
}
