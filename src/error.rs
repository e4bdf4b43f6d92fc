//! Error taxonomy for the listen-process resolver and statistics collector.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    /// One table row's address field could not be decoded. Line-local.
    #[error("malformed socket address: {0}")]
    MalformedAddress(String),

    /// The kernel interface itself is unreadable.
    #[error("scan failed reading {}: {source}", path.display())]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("listen port {0} not found")]
    NotFound(u16),

    #[error("process {0} not found")]
    ProcessNotFound(i32),

    #[error("invalid refresh interval {0}s (minimum 5s, or -1 to disable)")]
    InvalidInterval(i64),

    #[error("scan cancelled")]
    Cancelled,
}

impl ExporterError {
    pub(crate) fn scan_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ScanFailed {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExporterError>;
