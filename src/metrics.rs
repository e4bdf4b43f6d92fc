//! Prometheus metrics definitions for listen-process-exporter.
//!
//! `ProcessMetrics` holds the per-target families. They are registered in a
//! fresh registry for every scrape so counters can carry the absolute
//! values read from /proc. `ExporterMetrics` lives in the shared registry
//! and tracks the exporter itself.

use listen_process_exporter::{ListenProcess, ProcessStatistics};
use prometheus::{CounterVec, Gauge, GaugeVec, IntCounter, IntCounterVec, Opts, Registry};

/// Label names shared by every per-process family.
const LISTEN_PORT: &str = "listen_port";
const PID: &str = "pid";

/// Per-target process metrics.
#[derive(Clone)]
pub struct ProcessMetrics {
    pub thread_count: GaugeVec,
    pub cpu_seconds: CounterVec,
    pub read_bytes: IntCounterVec,
    pub read_calls: IntCounterVec,
    pub write_bytes: IntCounterVec,
    pub write_calls: IntCounterVec,
    pub major_page_faults: IntCounterVec,
    pub minor_page_faults: IntCounterVec,
    pub context_switches: IntCounterVec,
    pub memory_bytes: GaugeVec,
    pub open_fds: GaugeVec,
    pub start_time: GaugeVec,
}

impl ProcessMetrics {
    /// Creates and registers all per-process metrics with the registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let labels = &[LISTEN_PORT, PID];

        let thread_count = GaugeVec::new(
            Opts::new(
                "listen_port_process_thread_count",
                "number of threads in listen process",
            ),
            labels,
        )?;
        let cpu_seconds = CounterVec::new(
            Opts::new(
                "listen_port_process_cpu_seconds_total",
                "Cpu usage in seconds",
            ),
            &[LISTEN_PORT, PID, "mode"],
        )?;
        let read_bytes = IntCounterVec::new(
            Opts::new(
                "listen_port_process_read_bytes_total",
                "number of bytes read by this process",
            ),
            labels,
        )?;
        let read_calls = IntCounterVec::new(
            Opts::new(
                "listen_port_process_read_calls_total",
                "number of read calls made by this process",
            ),
            labels,
        )?;
        let write_bytes = IntCounterVec::new(
            Opts::new(
                "listen_port_process_write_bytes_total",
                "number of bytes written by this process",
            ),
            labels,
        )?;
        let write_calls = IntCounterVec::new(
            Opts::new(
                "listen_port_process_write_calls_total",
                "number of write calls made by this process",
            ),
            labels,
        )?;
        let major_page_faults = IntCounterVec::new(
            Opts::new(
                "listen_port_process_major_page_faults_total",
                "Major page faults",
            ),
            labels,
        )?;
        let minor_page_faults = IntCounterVec::new(
            Opts::new(
                "listen_port_process_minor_page_faults_total",
                "Minor page faults",
            ),
            labels,
        )?;
        let context_switches = IntCounterVec::new(
            Opts::new(
                "listen_port_process_context_switches_total",
                "Context switches",
            ),
            &[LISTEN_PORT, PID, "ctx_switch_type"],
        )?;
        let memory_bytes = GaugeVec::new(
            Opts::new(
                "listen_port_process_memory_bytes",
                "number of bytes of memory in use",
            ),
            &[LISTEN_PORT, PID, "memory_type"],
        )?;
        let open_fds = GaugeVec::new(
            Opts::new(
                "listen_port_process_open_file_desc",
                "number of open file descriptors of listen process",
            ),
            labels,
        )?;
        let start_time = GaugeVec::new(
            Opts::new(
                "listen_port_process_oldest_start_time_seconds",
                "start time in seconds since 1970/01/01 of listen process",
            ),
            labels,
        )?;

        registry.register(Box::new(thread_count.clone()))?;
        registry.register(Box::new(cpu_seconds.clone()))?;
        registry.register(Box::new(read_bytes.clone()))?;
        registry.register(Box::new(read_calls.clone()))?;
        registry.register(Box::new(write_bytes.clone()))?;
        registry.register(Box::new(write_calls.clone()))?;
        registry.register(Box::new(major_page_faults.clone()))?;
        registry.register(Box::new(minor_page_faults.clone()))?;
        registry.register(Box::new(context_switches.clone()))?;
        registry.register(Box::new(memory_bytes.clone()))?;
        registry.register(Box::new(open_fds.clone()))?;
        registry.register(Box::new(start_time.clone()))?;

        Ok(Self {
            thread_count,
            cpu_seconds,
            read_bytes,
            read_calls,
            write_bytes,
            write_calls,
            major_page_faults,
            minor_page_faults,
            context_switches,
            memory_bytes,
            open_fds,
            start_time,
        })
    }

    /// Sets every family from one collection of the listen process.
    pub fn set_for_process(&self, listen: &ListenProcess, stats: &ProcessStatistics) {
        let port = listen.port.to_string();
        let pid = listen.pid.to_string();
        let labels = &[port.as_str(), pid.as_str()];
        let with = |extra: &'static str| [port.as_str(), pid.as_str(), extra];

        self.start_time
            .with_label_values(labels)
            .set(stats.stat.start_time_seconds);
        self.thread_count
            .with_label_values(labels)
            .set(stats.stat.num_threads as f64);

        self.cpu_seconds
            .with_label_values(&with("user"))
            .inc_by(stats.cpu_user_seconds());
        self.cpu_seconds
            .with_label_values(&with("system"))
            .inc_by(stats.cpu_system_seconds());

        self.memory_bytes
            .with_label_values(&with("resident"))
            .set(stats.resident_bytes() as f64);
        self.memory_bytes
            .with_label_values(&with("virtual"))
            .set(stats.virtual_bytes() as f64);
        self.memory_bytes
            .with_label_values(&with("swapped"))
            .set(stats.status.vm_swap as f64);

        self.read_bytes
            .with_label_values(labels)
            .inc_by(stats.io.read_bytes);
        self.read_calls.with_label_values(labels).inc_by(stats.io.syscr);
        self.write_bytes
            .with_label_values(labels)
            .inc_by(stats.io.write_bytes);
        self.write_calls.with_label_values(labels).inc_by(stats.io.syscw);

        self.major_page_faults
            .with_label_values(labels)
            .inc_by(stats.stat.majflt);
        self.minor_page_faults
            .with_label_values(labels)
            .inc_by(stats.stat.minflt);

        self.context_switches
            .with_label_values(&with("voluntary"))
            .inc_by(stats.status.voluntary_ctxt_switches);
        self.context_switches
            .with_label_values(&with("nonvoluntary"))
            .inc_by(stats.status.nonvoluntary_ctxt_switches);

        self.open_fds
            .with_label_values(labels)
            .set(stats.open_fds as f64);
    }
}

/// Exporter self-metrics, registered once in the shared registry.
#[derive(Clone)]
pub struct ExporterMetrics {
    pub scrape_errors: IntCounter,
    pub scrape_procread_errors: IntCounter,
    pub scrape_partial_errors: IntCounter,
    pub scrape_duration: Gauge,
    pub refresh_duration: Gauge,
    pub listening_ports: Gauge,
}

impl ExporterMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let scrape_errors = IntCounter::new(
            "listen_port_process_scrape_errors",
            "general scrape errors: no proc metrics collected during a cycle",
        )?;
        let scrape_procread_errors = IntCounter::new(
            "listen_port_process_scrape_procread_errors",
            "incremented each time a proc's metrics collection fails",
        )?;
        let scrape_partial_errors = IntCounter::new(
            "listen_port_process_scrape_partial_errors",
            "incremented each time a tracked proc's metrics collection fails partially, e.g. unreadable I/O stats",
        )?;
        let scrape_duration = Gauge::new(
            "listen_port_process_scrape_duration_seconds",
            "Time spent serving the last metrics request",
        )?;
        let refresh_duration = Gauge::new(
            "listen_port_process_refresh_duration_seconds",
            "Time spent by the last listen process scan",
        )?;
        let listening_ports = Gauge::new(
            "listen_port_process_listening_ports",
            "Number of listening ports in the current snapshot",
        )?;

        registry.register(Box::new(scrape_errors.clone()))?;
        registry.register(Box::new(scrape_procread_errors.clone()))?;
        registry.register(Box::new(scrape_partial_errors.clone()))?;
        registry.register(Box::new(scrape_duration.clone()))?;
        registry.register(Box::new(refresh_duration.clone()))?;
        registry.register(Box::new(listening_ports.clone()))?;

        Ok(Self {
            scrape_errors,
            scrape_procread_errors,
            scrape_partial_errors,
            scrape_duration,
            refresh_duration,
            listening_ports,
        })
    }
}
