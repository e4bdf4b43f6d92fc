//! Socket inode to owning process index.
//!
//! Built by walking `<proc>/<pid>/fd/*` and resolving every descriptor that
//! links to `socket:[<inode>]`. Process listings are racy snapshots of a live
//! kernel, so per-process failures are skipped; only an unreadable proc root
//! fails the build.

use ahash::AHashMap as HashMap;
use rayon::prelude::*;
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{ExporterError, Result};

/// One descriptor referencing a socket inode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketInodeOwner {
    pub inode: String,
    pub pid: i32,
    pub fd: u32,
}

/// Mapping from socket inode to every `(pid, fd)` holding it, in discovery order.
#[derive(Debug, Default)]
pub struct InodeIndex {
    owners: HashMap<String, Vec<SocketInodeOwner>>,
}

impl InodeIndex {
    /// Walks every process under `proc_root`.
    pub fn build(proc_root: &Path, token: &CancellationToken) -> Result<Self> {
        let pids = list_pids(proc_root)?;
        debug!("Indexing socket inodes of {} processes", pids.len());

        // Ordered collect keeps ascending pid order for the merge below.
        let per_pid: Vec<Option<Vec<SocketInodeOwner>>> = pids
            .par_iter()
            .map(|&pid| {
                if token.is_cancelled() {
                    return None;
                }
                match process_socket_inodes(proc_root, pid) {
                    Ok(owners) => Some(owners),
                    Err(e) => {
                        trace!("Skipping pid {}: {}", pid, e);
                        Some(Vec::new())
                    }
                }
            })
            .collect();

        if token.is_cancelled() {
            return Err(ExporterError::Cancelled);
        }

        let mut index = InodeIndex::default();
        for owners in per_pid.into_iter().flatten() {
            for owner in owners {
                index.insert(owner);
            }
        }
        debug!("Indexed {} socket inodes", index.len());
        Ok(index)
    }

    /// Appends an owner after any already known for the same inode.
    pub fn insert(&mut self, owner: SocketInodeOwner) {
        self.owners.entry(owner.inode.clone()).or_default().push(owner);
    }

    pub fn owners(&self, inode: &str) -> Option<&[SocketInodeOwner]> {
        self.owners.get(inode).map(Vec::as_slice)
    }

    /// Pid of the first discovered owner of `inode`.
    pub fn first_pid(&self, inode: &str) -> Option<i32> {
        self.owners(inode).and_then(|o| o.first()).map(|o| o.pid)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Lists numeric entries of the proc root in ascending order.
pub fn list_pids(proc_root: &Path) -> Result<Vec<i32>> {
    let entries = fs::read_dir(proc_root).map_err(|e| ExporterError::scan_failed(proc_root, e))?;

    let mut pids: Vec<i32> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().and_then(|n| n.parse::<i32>().ok()))
        .collect();
    pids.sort_unstable();
    Ok(pids)
}

/// Resolves the socket descriptors of one process.
fn process_socket_inodes(proc_root: &Path, pid: i32) -> std::io::Result<Vec<SocketInodeOwner>> {
    let fd_dir = proc_root.join(pid.to_string()).join("fd");
    let mut out = Vec::new();

    for entry in fs::read_dir(&fd_dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let fd: u32 = match entry.file_name().to_str().and_then(|n| n.parse().ok()) {
            Some(fd) => fd,
            None => continue,
        };
        // Descriptor may be closed between readdir and readlink.
        let target = match fs::read_link(entry.path()) {
            Ok(t) => t,
            Err(_) => continue,
        };
        if let Some(inode) = target.to_str().and_then(parse_socket_link) {
            out.push(SocketInodeOwner {
                inode: inode.to_string(),
                pid,
                fd,
            });
        }
    }

    Ok(out)
}

/// Extracts `<inode>` from a `socket:[<inode>]` link target.
pub fn parse_socket_link(target: &str) -> Option<&str> {
    target
        .strip_prefix("socket:[")
        .and_then(|rest| rest.strip_suffix(']'))
        .filter(|inode| !inode.is_empty())
}
