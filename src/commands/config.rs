//! Config generation command implementation.

use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::config::{render_config, Config};

/// Generates configuration files
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> anyhow::Result<()> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| PathBuf::from("listen-process-exporter.yaml"));

    let mut content = render_config(&config, &format)?;
    if commented && matches!(format, ConfigFormat::Yaml) {
        content = add_config_comments(content);
    }

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Adds comments to YAML configuration
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Listen Process Exporter Configuration
# ======================================
#
# Server Configuration
# --------------------
# bind: "0.0.0.0"              # Bind IP (0.0.0.0 = all interfaces)
# port: 9911                   # HTTP port
# metrics_path: "/metrics"     # Metrics endpoint path
#
# Collection
# ----------
# target_port: 3306            # Listen port collected when no ?target= is given
# refresh_interval: 60         # Seconds between listen port scans (min 5, -1 = on demand only)
# proc_root: "/proc"           # Proc filesystem root (e.g. /host/proc in a container)
# scrape_timeout_ms: 10000     # Bound for a scan triggered by a scrape
#
# Feature Flags
# -------------
# enable_health: true          # Enable /health endpoint
#
# Logging
# -------
# log_level: "info"            # off, error, warn, info, debug, trace
# debug: false                 # Raise log level to debug
"#;

    format!("{comments}\n{yaml}")
}
