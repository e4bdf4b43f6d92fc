// listen-process-exporter
// Prometheus exporter for the process owning a TCP listening port
use anyhow::Result;
use axum::{routing::get, Router};
use chrono::Utc;
use clap::Parser;
use listen_process_exporter::cache::spawn_refresher;
use listen_process_exporter::{
    HealthStats, ListenProcessCache, ProcessStatsCollector, RefreshInterval, SocketTableScanner,
};
use prometheus::Registry;
use std::{fs, net::SocketAddr, path::Path, sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info};

mod cli;
mod commands;
mod config;
mod handlers;
mod metrics;
mod state;

use cli::{Args, Commands};
use commands::{command_check, command_config, command_scan};
use config::{
    parse_log_level, render_config, resolve_config, validate_effective_config, Config,
    DEFAULT_BIND_ADDR, DEFAULT_PORT, DEFAULT_SCRAPE_TIMEOUT_MS,
};
use handlers::{
    doc_handler, health_handler, index_handler, metrics_handler, probe_handler, refresh_handler,
};
use metrics::ExporterMetrics;
use state::AppState;

/// Installs the global fmt subscriber. `debug` raises the level to at least DEBUG.
fn setup_logging(config: &Config) {
    let mut level = config
        .log_level
        .as_deref()
        .and_then(parse_log_level)
        .unwrap_or(LevelFilter::INFO);
    if config.debug.unwrap_or(false) && level < LevelFilter::DEBUG {
        level = LevelFilter::DEBUG;
    }

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    info!("Logging initialized with level: {}", level);
}

fn read_hostname(proc_root: &Path) -> String {
    fs::read_to_string(proc_root.join("sys/kernel/hostname"))
        .map(|h| h.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        println!("{}", render_config(&config, &args.config_format)?);
        return Ok(());
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        let config = resolve_config(&args)?;
        if let Err(e) = validate_effective_config(&config) {
            eprintln!("❌ Configuration invalid: {}", e);
            std::process::exit(1);
        }
        setup_logging(&config);

        return match command {
            Commands::Check { proc, net, all } => command_check(*proc, *net, *all, &config),
            Commands::Config {
                output,
                format,
                commented,
            } => command_config(output.clone(), format.clone(), *commented),
            Commands::Scan { format, port } => command_scan(format.clone(), *port, &config),
        };
    }

    // Load configuration for main server mode
    let config = resolve_config(&args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }

    setup_logging(&config);
    info!("Starting listen-process-exporter");

    let bind_ip_str = config.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
    let port = config.port.unwrap_or(DEFAULT_PORT);
    let proc_root = config.proc_root();

    // Initialize Prometheus metrics registry
    let registry = Registry::new();
    let metrics = ExporterMetrics::new(&registry)?;
    debug!("Exporter metrics registered");

    let health_stats = Arc::new(HealthStats::new());
    let interval = RefreshInterval::from_secs(config.refresh_interval())?;
    let cache = Arc::new(
        ListenProcessCache::new(SocketTableScanner::new(&proc_root), interval)
            .with_health(health_stats.clone()),
    );

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        registry,
        metrics,
        cache: cache.clone(),
        collector: ProcessStatsCollector::new(&proc_root),
        health_stats,
        shutdown: shutdown.clone(),
        started_at: Utc::now(),
        hostname: read_hostname(&proc_root),
        scrape_timeout: Duration::from_millis(
            config.scrape_timeout_ms.unwrap_or(DEFAULT_SCRAPE_TIMEOUT_MS),
        ),
        config: Arc::new(config.clone()),
    });

    // Start background listen process refresh task
    let refresher = spawn_refresher(cache, shutdown.clone());

    // Configure HTTP server routes and start listening
    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port).parse()?;

    let mut app = Router::new()
        .route(config.metrics_path(), get(metrics_handler))
        .route("/probe", get(probe_handler))
        .route("/refresh_listen_process", get(refresh_handler))
        .route("/doc", get(doc_handler));

    // The landing page yields to a metrics endpoint mounted at "/".
    if config.metrics_path() != "/" {
        app = app.route("/", get(index_handler));
    }

    // Conditionally add health endpoint
    if config.enable_health.unwrap_or(true) {
        app = app.route("/health", get(health_handler));
    }

    let app = app.with_state(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!(
        "listen-process-exporter listening on http://{}:{}{}",
        bind_ip_str,
        port,
        config.metrics_path()
    );

    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                shutdown.cancel();
                return Err(e.into());
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, exiting...");
        }
    }

    // Stop the refresher and any in-flight scans
    shutdown.cancel();
    if let Err(e) = refresher.await {
        error!("Refresh task failed: {}", e);
    }

    info!("listen-process-exporter stopped gracefully");
    Ok(())
}
