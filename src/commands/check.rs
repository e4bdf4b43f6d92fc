//! System check command implementation.

use listen_process_exporter::address::AddressFamily;
use listen_process_exporter::inode::list_pids;
use listen_process_exporter::{ProcessStatsCollector, SocketTableScanner};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{validate_effective_config, Config};

/// Validates system requirements; exits with status 1 when a check fails.
pub fn command_check(
    proc: bool,
    net: bool,
    all: bool,
    config: &Config,
) -> anyhow::Result<()> {
    println!("🔍 Listen Process Exporter - System Check");
    println!("=========================================");

    let proc_root = config.proc_root();
    let mut all_ok = true;

    // Check the proc filesystem and our own statistics
    if proc || all {
        println!("\n📁 Checking {} filesystem...", proc_root.display());
        match list_pids(&proc_root) {
            Ok(pids) if !pids.is_empty() => {
                println!("   ✅ Can read {} process entries", pids.len());
            }
            Ok(_) => {
                println!("   ❌ No process entries in {}", proc_root.display());
                all_ok = false;
            }
            Err(e) => {
                println!("   ❌ {}", e);
                all_ok = false;
            }
        }

        let collector = ProcessStatsCollector::new(&proc_root);
        let own_pid = std::process::id() as i32;
        match collector.collect(own_pid) {
            Ok(stats) if stats.partial_errors == 0 => {
                println!(
                    "   ✅ Process statistics readable: RSS={}MB, threads={}, fds={}",
                    stats.resident_bytes() / 1024 / 1024,
                    stats.stat.num_threads,
                    stats.open_fds
                );
            }
            Ok(stats) => {
                println!(
                    "   ⚠️  Process statistics partially readable ({} sub-reads failed)",
                    stats.partial_errors
                );
            }
            Err(e) => {
                println!("   ❌ Process statistics unreadable: {}", e);
                all_ok = false;
            }
        }
    }

    // Check kernel TCP tables and a full scan
    if net || all {
        println!("\n🌐 Checking TCP socket tables...");
        let scanner = SocketTableScanner::new(&proc_root);
        for family in [AddressFamily::V4, AddressFamily::V6] {
            match scanner.read_table(family) {
                Ok(_) => println!("   ✅ {} readable", scanner.table_path(family).display()),
                Err(e) => {
                    println!("   ❌ {}", e);
                    all_ok = false;
                }
            }
        }

        let start = Instant::now();
        match scanner.scan(&CancellationToken::new()) {
            Ok(snapshot) => {
                let unattributed = snapshot.values().filter(|p| !p.is_attributed()).count();
                println!(
                    "   ✅ Scan found {} listening ports in {:.2}ms",
                    snapshot.len(),
                    start.elapsed().as_secs_f64() * 1000.0
                );
                if unattributed > 0 {
                    println!(
                        "   ⚠️  {} ports without a visible owner (run as root to see all processes)",
                        unattributed
                    );
                }
            }
            Err(e) => {
                println!("   ❌ Scan failed: {}", e);
                all_ok = false;
            }
        }
    }

    // Check configuration
    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review warnings");
        std::process::exit(1);
    }
}
