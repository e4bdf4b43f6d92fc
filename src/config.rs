//! Configuration loading, merging and validation.
//!
//! Precedence is CLI (if provided) > config file > built-in default.

use anyhow::{bail, Context, Result};
use listen_process_exporter::cache::{
    DEFAULT_REFRESH_INTERVAL_SECS, DISABLED_REFRESH_INTERVAL, MIN_REFRESH_INTERVAL_SECS,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing::level_filters::LevelFilter;

use crate::cli::{Args, ConfigFormat};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9911;
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_TARGET_PORT: u16 = 3306;
pub const DEFAULT_PROC_ROOT: &str = "/proc";
pub const DEFAULT_SCRAPE_TIMEOUT_MS: u64 = 10_000;

/// Endpoints served besides the metrics path.
const RESERVED_PATHS: &[&str] = &["/probe", "/refresh_listen_process", "/health", "/doc"];

/// Default config file locations, first existing wins.
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "/etc/listen-process-exporter/config.yaml",
    "/etc/listen-process-exporter/config.yml",
    "/etc/listen-process-exporter/config.json",
    "/etc/listen-process-exporter/config.toml",
    "./listen-process-exporter.yaml",
    "./listen-process-exporter.yml",
    "./listen-process-exporter.json",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,
    #[serde(alias = "telemetry-path")]
    pub metrics_path: Option<String>,

    // Collection
    /// Listen port collected when a scrape names no target
    #[serde(alias = "collect-port")]
    pub target_port: Option<u16>,
    /// Seconds between listen process refreshes, -1 disables periodic refresh
    #[serde(alias = "refresh")]
    pub refresh_interval: Option<i64>,
    pub proc_root: Option<PathBuf>,
    pub scrape_timeout_ms: Option<u64>,

    // Feature flags
    pub enable_health: Option<bool>,

    // Logging
    pub log_level: Option<String>,
    pub debug: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            metrics_path: Some(DEFAULT_METRICS_PATH.to_string()),
            target_port: Some(DEFAULT_TARGET_PORT),
            refresh_interval: Some(DEFAULT_REFRESH_INTERVAL_SECS),
            proc_root: Some(PathBuf::from(DEFAULT_PROC_ROOT)),
            scrape_timeout_ms: Some(DEFAULT_SCRAPE_TIMEOUT_MS),
            enable_health: Some(true),
            log_level: Some("info".into()),
            debug: Some(false),
        }
    }
}

impl Config {
    pub fn proc_root(&self) -> PathBuf {
        self.proc_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROC_ROOT))
    }

    pub fn metrics_path(&self) -> &str {
        self.metrics_path.as_deref().unwrap_or(DEFAULT_METRICS_PATH)
    }

    pub fn refresh_interval(&self) -> i64 {
        self.refresh_interval.unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS)
    }

    pub fn target_port(&self) -> u16 {
        self.target_port.unwrap_or(DEFAULT_TARGET_PORT)
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<()> {
    let interval = cfg.refresh_interval();
    if interval < MIN_REFRESH_INTERVAL_SECS && interval != DISABLED_REFRESH_INTERVAL {
        bail!(
            "refresh_interval too small ({}s): minimum is {}s, or {} to disable",
            interval,
            MIN_REFRESH_INTERVAL_SECS,
            DISABLED_REFRESH_INTERVAL
        );
    }

    let path = cfg.metrics_path();
    if path.is_empty() || !path.starts_with('/') {
        bail!("metrics_path '{}' must start with '/'", path);
    }
    if RESERVED_PATHS.contains(&path) {
        bail!("metrics_path '{}' collides with a built-in endpoint", path);
    }

    if let Some(level) = cfg.log_level.as_deref() {
        if parse_log_level(level).is_none() {
            bail!("unknown log_level '{}'", level);
        }
    }

    if cfg.scrape_timeout_ms == Some(0) {
        bail!("scrape_timeout_ms must be greater than 0");
    }

    Ok(())
}

/// Maps a configured log level name to a tracing filter.
pub fn parse_log_level(level: &str) -> Option<LevelFilter> {
    match level.to_ascii_lowercase().as_str() {
        "off" => Some(LevelFilter::OFF),
        "error" => Some(LevelFilter::ERROR),
        "warn" => Some(LevelFilter::WARN),
        "info" => Some(LevelFilter::INFO),
        "debug" => Some(LevelFilter::DEBUG),
        "trace" => Some(LevelFilter::TRACE),
        _ => None,
    }
}

/// Resolves configuration from CLI args, config file, and defaults
pub fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(path) = &args.metrics_path {
        config.metrics_path = Some(path.clone());
    }
    if let Some(target) = args.target_port {
        config.target_port = Some(target);
    }
    if let Some(interval) = args.refresh_interval {
        config.refresh_interval = Some(interval);
    }
    if let Some(root) = &args.proc_root {
        config.proc_root = Some(root.clone());
    }
    if let Some(ms) = args.scrape_timeout_ms {
        config.scrape_timeout_ms = Some(ms);
    }
    if args.disable_health {
        config.enable_health = Some(false);
    }
    if let Some(level) = &args.log_level {
        config.log_level = Some(level.as_str().to_string());
    }
    if args.debug {
        config.debug = Some(true);
    }

    Ok(config)
}

/// Loads a config file, merging missing fields from the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match DEFAULT_CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
            Some(p) => PathBuf::from(p),
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;

    let loaded: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content)?,
        Some("toml") => toml::from_str(&content)?,
        _ => serde_yaml::from_str(&content)?,
    };
    info!("Loaded configuration from: {}", path.display());

    Ok(merge_defaults(loaded))
}

fn merge_defaults(cfg: Config) -> Config {
    let d = Config::default();
    Config {
        port: cfg.port.or(d.port),
        bind: cfg.bind.or(d.bind),
        metrics_path: cfg.metrics_path.or(d.metrics_path),
        target_port: cfg.target_port.or(d.target_port),
        refresh_interval: cfg.refresh_interval.or(d.refresh_interval),
        proc_root: cfg.proc_root.or(d.proc_root),
        scrape_timeout_ms: cfg.scrape_timeout_ms.or(d.scrape_timeout_ms),
        enable_health: cfg.enable_health.or(d.enable_health),
        log_level: cfg.log_level.or(d.log_level),
        debug: cfg.debug.or(d.debug),
    }
}

/// Renders configuration in the requested format
pub fn render_config(config: &Config, format: &ConfigFormat) -> Result<String> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    })
}
