//! Internal health statistics of the exporter.
//!
//! Tracks running current/average/max/min values for refresh scans and
//! scrapes, rendered as a plain-text table by the `/health` endpoint.

use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Clone, Copy, Default)]
struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.last = value;
            self.sum = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

#[derive(Default)]
struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    /// Returns (current, average, max, min, count).
    fn snapshot(&self) -> (f64, f64, f64, f64, u64) {
        if let Ok(s) = self.inner.lock() {
            (s.last, s.avg(), s.max, s.min, s.count)
        } else {
            (0.0, 0.0, 0.0, 0.0, 0)
        }
    }
}

#[derive(Default)]
pub struct HealthStats {
    listening_ports: Stat,
    scan_duration_seconds: Stat,
    scrape_duration_seconds: Stat,
    total_scans: AtomicU64,
    failed_scans: AtomicU64,
    total_scrapes: AtomicU64,
}

impl HealthStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record_scan(&self, listening_ports: u64, scan_duration_seconds: f64) {
        self.listening_ports.add_sample(listening_ports as f64);
        self.scan_duration_seconds.add_sample(scan_duration_seconds);
        self.total_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_scan(&self) {
        self.failed_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scrape(&self, duration_seconds: f64) {
        self.scrape_duration_seconds.add_sample(duration_seconds);
        self.total_scrapes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_scans(&self) -> u64 {
        self.total_scans.load(Ordering::Relaxed)
    }

    pub fn failed_scans(&self) -> u64 {
        self.failed_scans.load(Ordering::Relaxed)
    }

    /// Duration of the most recent successful scan, 0 before the first one.
    pub fn last_scan_duration_seconds(&self) -> f64 {
        self.scan_duration_seconds.snapshot().0
    }

    pub fn render_table(&self) -> String {
        let (lp_cur, lp_avg, lp_max, lp_min, _) = self.listening_ports.snapshot();
        let (sd_cur, sd_avg, sd_max, sd_min, _) = self.scan_duration_seconds.snapshot();
        let (sc_cur, sc_avg, sc_max, sc_min, _) = self.scrape_duration_seconds.snapshot();

        let left_col = 26usize;
        let col_w = 12usize;

        let mut out = String::new();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "metric",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();

        writeln!(out, "{}", "-".repeat(left_col + 3 + (col_w + 3) * 4)).ok();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "listening ports",
            format!("{:.0}", lp_cur),
            format!("{:.1}", lp_avg),
            format!("{:.0}", lp_max),
            format!("{:.0}", lp_min),
            left = left_col,
            col = col_w
        )
        .ok();

        for (label, (cur, avg, max, min)) in [
            ("scan duration (s)", (sd_cur, sd_avg, sd_max, sd_min)),
            ("scrape duration (s)", (sc_cur, sc_avg, sc_max, sc_min)),
        ] {
            writeln!(
                out,
                "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
                label,
                format!("{:.3}", cur),
                format!("{:.3}", avg),
                format!("{:.3}", max),
                format!("{:.3}", min),
                left = left_col,
                col = col_w
            )
            .ok();
        }

        writeln!(out).ok();
        writeln!(out, "number of done scans: {}", self.total_scans()).ok();
        writeln!(out, "number of failed scans: {}", self.failed_scans()).ok();
        writeln!(
            out,
            "number of scrapes: {}",
            self.total_scrapes.load(Ordering::Relaxed)
        )
        .ok();

        out
    }
}
