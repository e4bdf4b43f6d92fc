//! System-wide constants needed to interpret per-process counters.
//!
//! This module provides the kernel clock tick rate and page size (via
//! `sysconf`) and the boot time from `/proc/stat`, which together turn
//! tick and page counts into seconds and bytes.

use once_cell::sync::Lazy;
use std::fs;
use std::path::Path;

/// Fallback USER_HZ used when sysconf fails. Linux reports 100 on every
/// mainstream architecture.
const DEFAULT_CLOCK_TICKS: u64 = 100;
const DEFAULT_PAGE_SIZE: u64 = 4096;

static CLOCK_TICKS: Lazy<u64> = Lazy::new(|| {
    // SAFETY: sysconf has no preconditions and only reads a constant.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        DEFAULT_CLOCK_TICKS
    }
});

static PAGE_SIZE: Lazy<u64> = Lazy::new(|| {
    // SAFETY: as above.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        DEFAULT_PAGE_SIZE
    }
});

/// Kernel clock ticks per second (USER_HZ).
pub fn clock_ticks_per_second() -> u64 {
    *CLOCK_TICKS
}

/// Memory page size in bytes.
pub fn page_size() -> u64 {
    *PAGE_SIZE
}

/// Reads the boot time (seconds since the epoch) from `<proc>/stat`.
pub fn read_boot_time(proc_root: &Path) -> Result<u64, String> {
    let path = proc_root.join("stat");
    let content = fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    parse_boot_time(&content)
}

/// Extracts the `btime` line from `/proc/stat` content.
pub fn parse_boot_time(content: &str) -> Result<u64, String> {
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("btime") {
            return rest
                .trim()
                .parse::<u64>()
                .map_err(|e| format!("Failed to parse btime: {}", e));
        }
    }
    Err("No btime line found in /proc/stat".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_boot_time() {
        let stat = "cpu  10132153 290696 3084719 46828483 16683 0 25195 0 0 0\n\
                    intr 1462898 0 0\n\
                    ctxt 115315\n\
                    btime 1700000000\n\
                    processes 12345\n";
        assert_eq!(parse_boot_time(stat), Ok(1_700_000_000));
    }

    #[test]
    fn test_parse_boot_time_missing() {
        let result = parse_boot_time("cpu  1 2 3 4\nctxt 5\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_boot_time_invalid() {
        assert!(parse_boot_time("btime abc\n").is_err());
    }

    #[test]
    fn test_sysconf_values_are_positive() {
        assert!(clock_ticks_per_second() > 0);
        assert!(page_size() >= 4096);
    }
}
