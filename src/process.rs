//! Per-process statistics collection from `/proc/<pid>`.
//!
//! Each statistics file is read independently. Some are permission-gated
//! (`io` for foreign processes) or vanish while the process exits, so a
//! failed sub-read degrades to a zeroed sub-record instead of failing the
//! whole collection. Only a missing process directory is an error.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{ExporterError, Result};
use crate::system;

/// Scheduling and CPU counters from `/proc/<pid>/stat`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessStat {
    pub state: char,
    pub minflt: u64,
    pub majflt: u64,
    pub utime_ticks: u64,
    pub stime_ticks: u64,
    pub num_threads: u64,
    pub start_time_ticks: u64,
    /// Start time in seconds since the epoch, 0 if the boot time is unknown.
    pub start_time_seconds: f64,
}

/// Page counts from `/proc/<pid>/statm`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessStatm {
    pub size: u64,
    pub resident: u64,
    pub shared: u64,
    pub text: u64,
    pub data: u64,
}

/// Memory and context-switch counters from `/proc/<pid>/status`, sizes in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessStatus {
    pub vm_rss: u64,
    pub vm_size: u64,
    pub vm_swap: u64,
    pub threads: u64,
    pub voluntary_ctxt_switches: u64,
    pub nonvoluntary_ctxt_switches: u64,
}

/// I/O counters from `/proc/<pid>/io`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessIo {
    pub rchar: u64,
    pub wchar: u64,
    pub syscr: u64,
    pub syscw: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub cancelled_write_bytes: u64,
}

/// Aggregate statistics for one process. Request-scoped, never cached.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessStatistics {
    pub pid: i32,
    pub stat: ProcessStat,
    pub statm: ProcessStatm,
    pub status: ProcessStatus,
    pub io: ProcessIo,
    pub open_fds: u64,
    /// Clock ticks per second used to convert tick counters.
    pub clock_ticks: u64,
    /// Number of sub-reads that failed and were zeroed.
    pub partial_errors: u32,
}

impl ProcessStatistics {
    pub fn cpu_user_seconds(&self) -> f64 {
        ticks_to_seconds(self.stat.utime_ticks, self.clock_ticks)
    }

    pub fn cpu_system_seconds(&self) -> f64 {
        ticks_to_seconds(self.stat.stime_ticks, self.clock_ticks)
    }

    /// Resident set size in bytes, preferring `status` over `statm`.
    pub fn resident_bytes(&self) -> u64 {
        if self.status.vm_rss > 0 {
            self.status.vm_rss
        } else {
            self.statm.resident * system::page_size()
        }
    }

    /// Virtual memory size in bytes, preferring `status` over `statm`.
    pub fn virtual_bytes(&self) -> u64 {
        if self.status.vm_size > 0 {
            self.status.vm_size
        } else {
            self.statm.size * system::page_size()
        }
    }
}

fn ticks_to_seconds(ticks: u64, hz: u64) -> f64 {
    if hz == 0 {
        0.0
    } else {
        ticks as f64 / hz as f64
    }
}

/// Reads statistics for single processes below a proc root.
#[derive(Debug, Clone)]
pub struct ProcessStatsCollector {
    proc_root: PathBuf,
    clock_ticks: u64,
    boot_time: Option<u64>,
}

impl ProcessStatsCollector {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        let proc_root = proc_root.into();
        let boot_time = match system::read_boot_time(&proc_root) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!("Boot time unavailable, start times will be 0: {}", e);
                None
            }
        };
        Self {
            proc_root,
            clock_ticks: system::clock_ticks_per_second(),
            boot_time,
        }
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }

    /// Collects all statistics for `pid`.
    ///
    /// Fails only with [`ExporterError::ProcessNotFound`] when the process
    /// directory is gone.
    pub fn collect(&self, pid: i32) -> Result<ProcessStatistics> {
        let dir = self.proc_root.join(pid.to_string());
        if !dir.is_dir() {
            return Err(ExporterError::ProcessNotFound(pid));
        }

        let mut partial_errors = 0u32;
        let mut degrade = |what: &str, e: io::Error| {
            debug!("collect process [{}] {} error: {}", pid, what, e);
            partial_errors += 1;
        };

        let io = read_io(&dir.join("io")).unwrap_or_else(|e| {
            degrade("io", e);
            ProcessIo::default()
        });
        let mut stat = read_stat(&dir.join("stat")).unwrap_or_else(|e| {
            degrade("stat", e);
            ProcessStat::default()
        });
        let statm = read_statm(&dir.join("statm")).unwrap_or_else(|e| {
            degrade("statm", e);
            ProcessStatm::default()
        });
        let status = read_status(&dir.join("status")).unwrap_or_else(|e| {
            degrade("status", e);
            ProcessStatus::default()
        });
        let open_fds = count_fds(&dir.join("fd")).unwrap_or_else(|e| {
            degrade("fd", e);
            0
        });

        if let Some(boot) = self.boot_time {
            if stat.start_time_ticks > 0 {
                stat.start_time_seconds =
                    boot as f64 + ticks_to_seconds(stat.start_time_ticks, self.clock_ticks);
            }
        }

        Ok(ProcessStatistics {
            pid,
            stat,
            statm,
            status,
            io,
            open_fds,
            clock_ticks: self.clock_ticks,
            partial_errors,
        })
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn read_io(path: &Path) -> io::Result<ProcessIo> {
    parse_io(&fs::read_to_string(path)?)
}

fn read_stat(path: &Path) -> io::Result<ProcessStat> {
    parse_stat(&fs::read_to_string(path)?)
}

fn read_statm(path: &Path) -> io::Result<ProcessStatm> {
    parse_statm(&fs::read_to_string(path)?)
}

fn read_status(path: &Path) -> io::Result<ProcessStatus> {
    parse_status(&fs::read_to_string(path)?)
}

/// Counts entries of a descriptor directory.
fn count_fds(path: &Path) -> io::Result<u64> {
    Ok(fs::read_dir(path)?.count() as u64)
}

/// Parses `key: value` lines of `/proc/<pid>/io`.
pub fn parse_io(content: &str) -> io::Result<ProcessIo> {
    let mut out = ProcessIo::default();
    let mut seen = 0;
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value: u64 = match value.trim().parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        let slot = match key.trim() {
            "rchar" => &mut out.rchar,
            "wchar" => &mut out.wchar,
            "syscr" => &mut out.syscr,
            "syscw" => &mut out.syscw,
            "read_bytes" => &mut out.read_bytes,
            "write_bytes" => &mut out.write_bytes,
            "cancelled_write_bytes" => &mut out.cancelled_write_bytes,
            _ => continue,
        };
        *slot = value;
        seen += 1;
    }
    if seen == 0 {
        return Err(invalid("no io counters found"));
    }
    Ok(out)
}

/// Parses `/proc/<pid>/stat`.
///
/// The command name may contain spaces and parentheses, so fields are
/// counted from the last `)`.
pub fn parse_stat(content: &str) -> io::Result<ProcessStat> {
    let close = content.rfind(')').ok_or_else(|| invalid("stat: missing comm"))?;
    let fields: Vec<&str> = content[close + 1..].split_whitespace().collect();
    // fields[0] is field 3 (state) of proc(5).
    if fields.len() < 20 {
        return Err(invalid(format!(
            "stat: expected at least 20 fields after comm, got {}",
            fields.len()
        )));
    }

    let num = |i: usize| -> io::Result<u64> {
        fields[i]
            .parse::<u64>()
            .map_err(|e| invalid(format!("stat field {}: {}", i + 3, e)))
    };

    Ok(ProcessStat {
        state: fields[0].chars().next().unwrap_or('?'),
        minflt: num(7)?,
        majflt: num(9)?,
        utime_ticks: num(11)?,
        stime_ticks: num(12)?,
        num_threads: num(17)?,
        start_time_ticks: num(19)?,
        start_time_seconds: 0.0,
    })
}

/// Parses `/proc/<pid>/statm`.
pub fn parse_statm(content: &str) -> io::Result<ProcessStatm> {
    let parts: Vec<u64> = content
        .split_whitespace()
        .map(|p| p.parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| invalid(format!("statm: {}", e)))?;
    if parts.len() < 6 {
        return Err(invalid(format!("statm: expected at least 6 fields, got {}", parts.len())));
    }
    Ok(ProcessStatm {
        size: parts[0],
        resident: parts[1],
        shared: parts[2],
        text: parts[3],
        data: parts[5],
    })
}

/// Parses the fields of `/proc/<pid>/status` used for metrics.
pub fn parse_status(content: &str) -> io::Result<ProcessStatus> {
    let mut out = ProcessStatus::default();
    let mut seen = 0;
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let slot = match key {
            "VmRSS" => &mut out.vm_rss,
            "VmSize" => &mut out.vm_size,
            "VmSwap" => &mut out.vm_swap,
            "Threads" => &mut out.threads,
            "voluntary_ctxt_switches" => &mut out.voluntary_ctxt_switches,
            "nonvoluntary_ctxt_switches" => &mut out.nonvoluntary_ctxt_switches,
            _ => continue,
        };
        let mut parts = value.split_whitespace();
        let Some(n) = parts.next().and_then(|v| v.parse::<u64>().ok()) else {
            continue;
        };
        // Vm* lines carry a "kB" unit.
        *slot = if parts.next() == Some("kB") { n * 1024 } else { n };
        seen += 1;
    }
    if seen == 0 {
        return Err(invalid("status: no known fields"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    const STAT: &str = "42 (my (odd) db) S 1 42 42 0 -1 4194560 1500 0 7 0 250 120 0 0 20 0 9 0 5000 1024000000 2500 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 3 0 0 0 0 0\n";
    const STATM: &str = "250000 2500 700 100 0 12000 0\n";
    const STATUS: &str = "Name:\tmysqld\nState:\tS (sleeping)\nVmSize:\t 1000000 kB\nVmRSS:\t   10000 kB\nVmSwap:\t      16 kB\nThreads:\t9\nvoluntary_ctxt_switches:\t350\nnonvoluntary_ctxt_switches:\t12\n";
    const IO: &str = "rchar: 4096\nwchar: 2048\nsyscr: 10\nsyscw: 5\nread_bytes: 8192\nwrite_bytes: 1024\ncancelled_write_bytes: 0\n";

    fn fake_process(root: &Path, pid: i32, with_io: bool) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(dir.join("fd")).unwrap();
        fs::write(dir.join("stat"), STAT).unwrap();
        fs::write(dir.join("statm"), STATM).unwrap();
        fs::write(dir.join("status"), STATUS).unwrap();
        if with_io {
            fs::write(dir.join("io"), IO).unwrap();
        }
        symlink("/dev/null", dir.join("fd").join("0")).unwrap();
        symlink("socket:[12345]", dir.join("fd").join("3")).unwrap();
        fs::write(root.join("stat"), "cpu 1 2 3\nbtime 1700000000\n").unwrap();
    }

    #[test]
    fn test_parse_stat_with_parens_in_comm() {
        let stat = parse_stat(STAT).unwrap();
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.minflt, 1500);
        assert_eq!(stat.majflt, 7);
        assert_eq!(stat.utime_ticks, 250);
        assert_eq!(stat.stime_ticks, 120);
        assert_eq!(stat.num_threads, 9);
        assert_eq!(stat.start_time_ticks, 5000);
    }

    #[test]
    fn test_parse_stat_truncated() {
        assert!(parse_stat("42 (x) S 1 2 3").is_err());
        assert!(parse_stat("garbage").is_err());
    }

    #[test]
    fn test_parse_statm() {
        let statm = parse_statm(STATM).unwrap();
        assert_eq!(statm.size, 250000);
        assert_eq!(statm.resident, 2500);
        assert_eq!(statm.data, 12000);
        assert!(parse_statm("1 2 x").is_err());
    }

    #[test]
    fn test_parse_status_units() {
        let status = parse_status(STATUS).unwrap();
        assert_eq!(status.vm_rss, 10000 * 1024);
        assert_eq!(status.vm_size, 1000000 * 1024);
        assert_eq!(status.vm_swap, 16 * 1024);
        assert_eq!(status.threads, 9);
        assert_eq!(status.voluntary_ctxt_switches, 350);
        assert_eq!(status.nonvoluntary_ctxt_switches, 12);
    }

    #[test]
    fn test_parse_io() {
        let io = parse_io(IO).unwrap();
        assert_eq!(io.read_bytes, 8192);
        assert_eq!(io.syscw, 5);
        assert!(parse_io("").is_err());
    }

    #[test]
    fn test_collect_full_process() {
        let tmp = TempDir::new().unwrap();
        fake_process(tmp.path(), 42, true);

        let collector = ProcessStatsCollector::new(tmp.path());
        let stats = collector.collect(42).unwrap();
        assert_eq!(stats.pid, 42);
        assert_eq!(stats.partial_errors, 0);
        assert_eq!(stats.io.write_bytes, 1024);
        assert_eq!(stats.open_fds, 2);
        assert_eq!(stats.resident_bytes(), 10000 * 1024);
        let expected_start = 1_700_000_000.0 + 5000.0 / stats.clock_ticks as f64;
        assert!((stats.stat.start_time_seconds - expected_start).abs() < 1e-6);
    }

    #[test]
    fn test_collect_missing_io_degrades_to_zero() {
        let tmp = TempDir::new().unwrap();
        fake_process(tmp.path(), 42, false);

        let stats = ProcessStatsCollector::new(tmp.path()).collect(42).unwrap();
        assert_eq!(stats.io, ProcessIo::default());
        assert_eq!(stats.partial_errors, 1);
        assert_eq!(stats.stat.num_threads, 9);
        assert_eq!(stats.status.vm_rss, 10000 * 1024);
        assert_eq!(stats.statm.resident, 2500);
        assert_eq!(stats.open_fds, 2);
    }

    #[test]
    fn test_collect_unreadable_io_degrades_to_zero() {
        let tmp = TempDir::new().unwrap();
        fake_process(tmp.path(), 42, false);
        // A directory in place of the file fails every read, even as root.
        fs::create_dir(tmp.path().join("42").join("io")).unwrap();

        let stats = ProcessStatsCollector::new(tmp.path()).collect(42).unwrap();
        assert_eq!(stats.io, ProcessIo::default());
        assert_eq!(stats.partial_errors, 1);
        assert!(stats.cpu_user_seconds() > 0.0);
    }

    #[test]
    fn test_collect_missing_process() {
        let tmp = TempDir::new().unwrap();
        let result = ProcessStatsCollector::new(tmp.path()).collect(4242);
        assert!(matches!(result, Err(ExporterError::ProcessNotFound(4242))));
    }

    #[test]
    fn test_collect_empty_process_dir_is_all_zero() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("7")).unwrap();

        let stats = ProcessStatsCollector::new(tmp.path()).collect(7).unwrap();
        assert_eq!(stats.partial_errors, 5);
        assert_eq!(stats.open_fds, 0);
        assert_eq!(stats.stat, ProcessStat::default());
        assert_eq!(stats.stat.start_time_seconds, 0.0);
    }
}
