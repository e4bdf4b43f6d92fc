//! listen-process-exporter core library.
//!
//! Resolves which process owns a TCP listening port by joining the kernel TCP
//! tables against per-process socket descriptors, caches the result, and
//! collects resource-usage statistics for the owning process.

pub mod address;
pub mod cache;
pub mod error;
pub mod health;
pub mod inode;
pub mod process;
pub mod scanner;
pub mod system;

pub use cache::{ListenProcessCache, RefreshInterval, RefreshOutcome};
pub use error::{ExporterError, Result};
pub use health::HealthStats;
pub use process::{ProcessStatistics, ProcessStatsCollector};
pub use scanner::{ListenProcess, ListenProcessSnapshot, SocketTableScanner};
