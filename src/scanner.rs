//! Listening socket discovery from the kernel TCP tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::address::{decode_address, is_unconnected_peer, AddressFamily};
use crate::error::{ExporterError, Result};
use crate::inode::InodeIndex;

/// Minimum whitespace-separated fields of a usable table row.
const MIN_TABLE_FIELDS: usize = 10;
const LOCAL_ADDRESS_FIELD: usize = 1;
const REMOTE_ADDRESS_FIELD: usize = 2;
const INODE_FIELD: usize = 9;

/// A listening port and the process that owns it (`pid == 0` when unresolved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenProcess {
    pub pid: i32,
    pub port: u16,
}

impl ListenProcess {
    pub fn is_attributed(&self) -> bool {
        self.pid != 0
    }
}

/// All listening ports seen by one scan pass, keyed by port.
pub type ListenProcessSnapshot = BTreeMap<u16, ListenProcess>;

/// Reads `<proc>/net/tcp{,6}` and joins listeners against the inode index.
#[derive(Debug, Clone)]
pub struct SocketTableScanner {
    proc_root: PathBuf,
}

impl SocketTableScanner {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }

    pub fn table_path(&self, family: AddressFamily) -> PathBuf {
        self.proc_root.join("net").join(family.table_name())
    }

    /// Reads one family's table in a single read.
    pub fn read_table(&self, family: AddressFamily) -> Result<String> {
        let path = self.table_path(family);
        fs::read_to_string(&path).map_err(|e| ExporterError::scan_failed(path, e))
    }

    /// Scans IPv4 then IPv6; an IPv6 listener replaces an IPv4 one on the same port.
    pub fn scan(&self, token: &CancellationToken) -> Result<ListenProcessSnapshot> {
        let v4 = self.read_table(AddressFamily::V4)?;
        let v6 = self.read_table(AddressFamily::V6)?;
        let index = InodeIndex::build(&self.proc_root, token)?;

        let mut snapshot = parse_table(AddressFamily::V4, &v4, &index);
        snapshot.extend(parse_table(AddressFamily::V6, &v6, &index));
        debug!(
            "Scan found {} listening ports ({} socket inodes indexed)",
            snapshot.len(),
            index.len()
        );
        Ok(snapshot)
    }
}

/// Parses table contents, keeping rows without a real peer.
///
/// Malformed rows are skipped. Later rows for the same port win.
pub fn parse_table(
    family: AddressFamily,
    contents: &str,
    index: &InodeIndex,
) -> ListenProcessSnapshot {
    let mut out = ListenProcessSnapshot::new();

    for line in contents.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < MIN_TABLE_FIELDS {
            continue;
        }

        let local = match decode_address(family, fields[LOCAL_ADDRESS_FIELD]) {
            Ok(a) => a,
            Err(e) => {
                trace!("Skipping row: {}", e);
                continue;
            }
        };
        let remote = match decode_address(family, fields[REMOTE_ADDRESS_FIELD]) {
            Ok(a) => a,
            Err(e) => {
                trace!("Skipping row: {}", e);
                continue;
            }
        };

        if !is_unconnected_peer(&remote.ip) {
            continue;
        }

        let pid = index.first_pid(fields[INODE_FIELD]).unwrap_or(0);
        out.insert(
            local.port,
            ListenProcess {
                pid,
                port: local.port,
            },
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::SocketInodeOwner;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    const HEADER: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode";

    fn owner(inode: &str, pid: i32, fd: u32) -> SocketInodeOwner {
        SocketInodeOwner {
            inode: inode.into(),
            pid,
            fd,
        }
    }

    fn table(rows: &[&str]) -> String {
        let mut s = String::from(HEADER);
        for r in rows {
            s.push('\n');
            s.push_str(r);
        }
        s.push('\n');
        s
    }

    #[test]
    fn test_listener_kept_connection_excluded() {
        let mut index = InodeIndex::default();
        index.insert(owner("12345", 42, 3));
        index.insert(owner("23456", 43, 4));

        let contents = table(&[
            "   0: 00000000:0CEA 00000000:0000 0A 00000000:00000000 00:00000000 00000000   999        0 12345 1 0000000000000000 100 0 0 10 0",
            "   1: 0100007F:0CEA 0100007F:D431 01 00000000:00000000 00:00000000 00000000   999        0 23456 1 0000000000000000 20 4 30 10 -1",
            "   2: 0100007F:1F90 0A01A8C0:C350 01 00000000:00000000 00:00000000 00000000   999        0 34567 1 0000000000000000 20 4 30 10 -1",
        ]);

        let snap = parse_table(AddressFamily::V4, &contents, &index);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get(&3306), Some(&ListenProcess { pid: 42, port: 3306 }));
        assert!(snap.get(&8080).is_none());
    }

    #[test]
    fn test_first_owner_attributed() {
        let mut index = InodeIndex::default();
        index.insert(owner("555", 10, 3));
        index.insert(owner("555", 11, 3));

        let contents = table(&[
            "   0: 00000000:0050 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 555 1 0000000000000000 100 0 0 10 0",
        ]);
        let snap = parse_table(AddressFamily::V4, &contents, &index);
        assert_eq!(snap[&80].pid, 10);
    }

    #[test]
    fn test_unknown_inode_gives_zero_pid() {
        let index = InodeIndex::default();
        let contents = table(&[
            "   0: 00000000:0016 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 98765 1 0000000000000000 100 0 0 10 0",
        ]);
        let snap = parse_table(AddressFamily::V4, &contents, &index);
        assert_eq!(snap[&22], ListenProcess { pid: 0, port: 22 });
        assert!(!snap[&22].is_attributed());
    }

    #[test]
    fn test_malformed_rows_skipped() {
        let index = InodeIndex::default();
        let contents = table(&[
            "   0: 00000000:0016 00000000:0000 0A",
            "   1: ZZZZZZZZ:0016 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 1 1 0 100 0 0 10 0",
            "   2: 00000000:0017 00000000 0A 00000000:00000000 00:00000000 00000000     0        0 2 1 0 100 0 0 10 0",
            "",
            "   3: 00000000:0018 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 3 1 0 100 0 0 10 0",
        ]);
        let snap = parse_table(AddressFamily::V4, &contents, &index);
        assert_eq!(snap.keys().copied().collect::<Vec<_>>(), vec![24]);
    }

    #[test]
    fn test_non_ascii_address_row_skipped() {
        let local = ["0000000\u{e9}", &"0".repeat(23), ":0050"].concat();
        let row = format!(
            "   0: {} 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 1 1 0 100 0 0 10 0",
            local
        );
        let contents = table(&[row.as_str()]);
        let snap = parse_table(AddressFamily::V6, &contents, &InodeIndex::default());
        assert!(snap.is_empty());
    }

    #[test]
    fn test_header_only_table() {
        let snap = parse_table(AddressFamily::V4, HEADER, &InodeIndex::default());
        assert!(snap.is_empty());
        assert!(parse_table(AddressFamily::V4, "", &InodeIndex::default()).is_empty());
    }

    #[test]
    fn test_last_row_wins_within_family() {
        let mut index = InodeIndex::default();
        index.insert(owner("1", 100, 3));
        index.insert(owner("2", 200, 3));
        let contents = table(&[
            "   0: 00000000:0050 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 1 1 0 100 0 0 10 0",
            "   1: 0100007F:0050 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 2 1 0 100 0 0 10 0",
        ]);
        let snap = parse_table(AddressFamily::V4, &contents, &index);
        assert_eq!(snap[&80].pid, 200);
    }

    #[test]
    fn test_ipv6_listeners() {
        let mut index = InodeIndex::default();
        index.insert(owner("4000", 77, 9));
        index.insert(owner("4001", 78, 9));
        let contents = table(&[
            "   0: 00000000000000000000000000000000:1F90 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 4000 1 0 100 0 0 10 0",
            "   1: 00000000000000000000000001000000:0277 00000000000000000000000001000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 4001 1 0 100 0 0 10 0",
            "   2: 00000000000000000000000001000000:1F91 B80D0120000000000000000001000000:9C40 01 00000000:00000000 00:00000000 00000000     0        0 4002 1 0 100 0 0 10 0",
        ]);
        let snap = parse_table(AddressFamily::V6, &contents, &index);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[&8080].pid, 77);
        assert_eq!(snap[&631].pid, 78);
    }

    #[test]
    fn test_scan_ipv6_replaces_ipv4_on_same_port() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("net")).unwrap();
        fs::write(
            root.join("net/tcp"),
            table(&[
                "   0: 00000000:0050 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 1010 1 0 100 0 0 10 0",
            ]),
        )
        .unwrap();
        fs::write(
            root.join("net/tcp6"),
            table(&[
                "   0: 00000000000000000000000000000000:0050 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 2020 1 0 100 0 0 10 0",
            ]),
        )
        .unwrap();
        for (pid, inode) in [(10, 1010), (20, 2020)] {
            let fd = root.join(pid.to_string()).join("fd");
            fs::create_dir_all(&fd).unwrap();
            symlink(format!("socket:[{inode}]"), fd.join("3")).unwrap();
        }

        let snap = SocketTableScanner::new(root)
            .scan(&CancellationToken::new())
            .unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get(&80), Some(&ListenProcess { pid: 20, port: 80 }));
    }
}
