//! One-shot scan command implementation.

use listen_process_exporter::{ExporterError, ProcessStatsCollector, SocketTableScanner};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::ScanFormat;
use crate::config::Config;

/// Scans listening ports once and prints their owners, or one port's owner
/// with its statistics.
pub fn command_scan(
    format: ScanFormat,
    port: Option<u16>,
    config: &Config,
) -> anyhow::Result<()> {
    let proc_root = config.proc_root();
    let scanner = SocketTableScanner::new(&proc_root);

    let start = Instant::now();
    let snapshot = scanner.scan(&CancellationToken::new())?;
    info!(
        "Scanned {} listening ports in {:.2}ms",
        snapshot.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    let Some(port) = port else {
        match format {
            ScanFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            ScanFormat::Table => {
                println!("{:>8} | {:>8}", "port", "pid");
                println!("{}", "-".repeat(19));
                for (port, p) in &snapshot {
                    let pid = if p.is_attributed() {
                        p.pid.to_string()
                    } else {
                        "-".to_string()
                    };
                    println!("{:>8} | {:>8}", port, pid);
                }
            }
        }
        return Ok(());
    };

    let listen = *snapshot.get(&port).ok_or(ExporterError::NotFound(port))?;
    if !listen.is_attributed() {
        anyhow::bail!("listen port {} has no visible owner", port);
    }
    let stats = ProcessStatsCollector::new(&proc_root).collect(listen.pid)?;

    match format {
        ScanFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        ScanFormat::Table => {
            println!("listen port:        {}", port);
            println!("pid:                {}", listen.pid);
            println!("state:              {}", stats.stat.state);
            println!("threads:            {}", stats.stat.num_threads);
            println!("cpu user (s):       {:.2}", stats.cpu_user_seconds());
            println!("cpu system (s):     {:.2}", stats.cpu_system_seconds());
            println!("resident (bytes):   {}", stats.resident_bytes());
            println!("virtual (bytes):    {}", stats.virtual_bytes());
            println!("swapped (bytes):    {}", stats.status.vm_swap);
            println!("read bytes:         {}", stats.io.read_bytes);
            println!("write bytes:        {}", stats.io.write_bytes);
            println!("open fds:           {}", stats.open_fds);
            println!("start time (epoch): {:.0}", stats.stat.start_time_seconds);
            if stats.partial_errors > 0 {
                println!("⚠️  {} statistics files unreadable", stats.partial_errors);
            }
        }
    }

    Ok(())
}
