//! CLI arguments and subcommands for listen-process-exporter.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Output format of the `scan` subcommand
#[derive(Debug, Clone, ValueEnum)]
pub enum ScanFormat {
    Table,
    Json,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "listen-process-exporter",
    about = "Prometheus exporter for the process that owns a TCP listening port",
    long_about = "Prometheus exporter for the process that owns a TCP listening port.\n\n\
                  Resolves the owning process of a listening port from /proc/net/tcp{,6} and \
                  per-process socket descriptors, and exports its CPU, memory, I/O, \
                  context-switch and file descriptor usage.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Path under which to expose metrics
    #[arg(long)]
    pub metrics_path: Option<String>,

    /// Listen port collected when a scrape names no target
    #[arg(long)]
    pub target_port: Option<u16>,

    /// Refresh listen process interval in seconds (minimum 5, -1 disables)
    #[arg(long, allow_negative_numbers = true)]
    pub refresh_interval: Option<i64>,

    /// Root of the proc filesystem
    #[arg(long)]
    pub proc_root: Option<PathBuf>,

    /// Upper bound for an on-demand scan during a scrape, in milliseconds
    #[arg(long)]
    pub scrape_timeout_ms: Option<u64>,

    /// Log level [default: info]
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration and system requirements
    Check {
        /// Check the proc filesystem and process statistics
        #[arg(long)]
        proc: bool,

        /// Check the kernel TCP tables
        #[arg(long)]
        net: bool,

        /// Check all system requirements
        #[arg(long)]
        all: bool,
    },

    /// Generate configuration files
    Config {
        /// Output file path
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Scan listening ports once and print their owners
    Scan {
        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: ScanFormat,

        /// Show the owner and statistics of a single port
        #[arg(long)]
        port: Option<u16>,
    },
}
