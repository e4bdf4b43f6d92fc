//! Listening port cache.
//!
//! This module provides `ListenProcessCache`, which holds the latest
//! port -> process snapshot and rebuilds it wholesale, either on a timer or
//! when a lookup misses. A debounce guard measured from the last successful
//! refresh keeps lookup misses and the timer from scanning more than once
//! per interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ExporterError, Result};
use crate::health::HealthStats;
use crate::scanner::{ListenProcess, ListenProcessSnapshot, SocketTableScanner};

pub const DEFAULT_REFRESH_INTERVAL_SECS: i64 = 60;
pub const MIN_REFRESH_INTERVAL_SECS: i64 = 5;
/// Disables periodic refresh; the cache is then refreshed on demand only.
pub const DISABLED_REFRESH_INTERVAL: i64 = -1;

/// Refresh cadence, doubling as the debounce window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshInterval {
    Disabled,
    Every(Duration),
}

impl RefreshInterval {
    pub fn from_secs(secs: i64) -> Result<Self> {
        if secs == DISABLED_REFRESH_INTERVAL {
            return Ok(RefreshInterval::Disabled);
        }
        if secs < MIN_REFRESH_INTERVAL_SECS {
            return Err(ExporterError::InvalidInterval(secs));
        }
        Ok(RefreshInterval::Every(Duration::from_secs(secs as u64)))
    }

    pub fn as_secs(&self) -> i64 {
        match self {
            RefreshInterval::Disabled => DISABLED_REFRESH_INTERVAL,
            RefreshInterval::Every(d) => d.as_secs() as i64,
        }
    }

    pub fn period(&self) -> Option<Duration> {
        match self {
            RefreshInterval::Disabled => None,
            RefreshInterval::Every(d) => Some(*d),
        }
    }
}

impl Default for RefreshInterval {
    fn default() -> Self {
        RefreshInterval::Every(Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS as u64))
    }
}

/// Result of a refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A scan ran and its snapshot was installed.
    Refreshed { ports: usize, duration: Duration },
    /// Debounced, or a newer snapshot was already installed.
    Skipped,
}

struct CacheState {
    snapshot: Arc<ListenProcessSnapshot>,
    last_refresh: Option<Instant>,
}

/// Concurrently readable port -> process cache.
pub struct ListenProcessCache {
    scanner: SocketTableScanner,
    state: RwLock<CacheState>,
    interval: RwLock<RefreshInterval>,
    interval_changed: Notify,
    scans: AtomicU64,
    health: Option<Arc<HealthStats>>,
}

impl ListenProcessCache {
    pub fn new(scanner: SocketTableScanner, interval: RefreshInterval) -> Self {
        Self {
            scanner,
            state: RwLock::new(CacheState {
                snapshot: Arc::new(ListenProcessSnapshot::new()),
                last_refresh: None,
            }),
            interval: RwLock::new(interval),
            interval_changed: Notify::new(),
            scans: AtomicU64::new(0),
            health: None,
        }
    }

    /// Records scan timings into `health`.
    pub fn with_health(mut self, health: Arc<HealthStats>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn scanner(&self) -> &SocketTableScanner {
        &self.scanner
    }

    pub fn interval(&self) -> RefreshInterval {
        *self.interval.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reconfigures the refresh cadence and wakes the background refresher.
    pub fn set_interval(&self, secs: i64) -> Result<()> {
        let interval = RefreshInterval::from_secs(secs)?;
        *self.interval.write().unwrap_or_else(PoisonError::into_inner) = interval;
        match interval {
            RefreshInterval::Disabled => info!("periodic listen process refresh disabled"),
            RefreshInterval::Every(d) => info!("set refresh interval second: {}", d.as_secs()),
        }
        self.interval_changed.notify_one();
        Ok(())
    }

    /// Current snapshot. Never partially updated.
    pub fn snapshot(&self) -> Arc<ListenProcessSnapshot> {
        self.read_state().snapshot.clone()
    }

    pub fn last_refresh(&self) -> Option<Instant> {
        self.read_state().last_refresh
    }

    /// Number of scans actually performed, successful or not.
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Cached entry for `port`, without refreshing.
    pub fn get(&self, port: u16) -> Option<ListenProcess> {
        self.read_state().snapshot.get(&port).copied()
    }

    pub fn is_fresh_at(&self, now: Instant) -> bool {
        is_fresh(self.read_state().last_refresh, self.interval(), now)
    }

    /// Looks up the owner of `port`, refreshing once on a miss.
    pub fn lookup(&self, port: u16) -> Result<ListenProcess> {
        self.lookup_with(port, &CancellationToken::new())
    }

    /// As [`lookup`](Self::lookup), with a token bounding the refresh scan.
    ///
    /// Scan failures are returned; a port still missing after the refresh
    /// (or after a debounced no-op) is [`ExporterError::NotFound`].
    pub fn lookup_with(&self, port: u16, token: &CancellationToken) -> Result<ListenProcess> {
        if let Some(p) = self.get(port) {
            return Ok(p);
        }

        debug!("listen port {} not cached, refreshing", port);
        self.refresh(token)?;

        self.get(port).ok_or(ExporterError::NotFound(port))
    }

    pub fn refresh(&self, token: &CancellationToken) -> Result<RefreshOutcome> {
        self.refresh_at(Instant::now(), token)
    }

    /// Rebuilds the snapshot unless one younger than the interval exists.
    ///
    /// The scan runs without holding any lock. On failure the current
    /// snapshot and its timestamp are kept, so the next attempt is not
    /// debounced by the failed one.
    pub fn refresh_at(&self, now: Instant, token: &CancellationToken) -> Result<RefreshOutcome> {
        if self.is_fresh_at(now) {
            debug!("listen process cache fresh, skipping refresh");
            return Ok(RefreshOutcome::Skipped);
        }

        let start = Instant::now();
        self.scans.fetch_add(1, Ordering::Relaxed);
        let snapshot = match self.scanner.scan(token) {
            Ok(s) => s,
            Err(e) => {
                if let Some(h) = &self.health {
                    h.record_failed_scan();
                }
                warn!("refresh listen process failed: {}", e);
                return Err(e);
            }
        };
        let duration = start.elapsed();
        let ports = snapshot.len();

        for (port, p) in &snapshot {
            debug!("found listen port {} pid {}", port, p.pid);
        }

        if !self.install(snapshot, now) {
            debug!("fresher listen process snapshot installed during scan");
            return Ok(RefreshOutcome::Skipped);
        }

        if let Some(h) = &self.health {
            h.record_scan(ports as u64, duration.as_secs_f64());
        }
        debug!(
            "refresh listen process success: {} ports in {:.2}ms",
            ports,
            duration.as_secs_f64() * 1000.0
        );

        Ok(RefreshOutcome::Refreshed { ports, duration })
    }

    /// Swaps in `snapshot` unless one installed while it was being scanned
    /// is newer than `now` or still fresh at `now`.
    fn install(&self, snapshot: ListenProcessSnapshot, now: Instant) -> bool {
        let interval = self.interval();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let newer = state.last_refresh.is_some_and(|t| t > now);
        if newer || is_fresh(state.last_refresh, interval, now) {
            return false;
        }
        state.snapshot = Arc::new(snapshot);
        state.last_refresh = Some(now);
        true
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_fresh(last_refresh: Option<Instant>, interval: RefreshInterval, now: Instant) -> bool {
    match (interval, last_refresh) {
        (RefreshInterval::Every(window), Some(last)) => {
            now.saturating_duration_since(last) < window
        }
        _ => false,
    }
}

/// Spawns the periodic refresher bound to `token`.
///
/// Performs an initial refresh, then one per interval. Scans run on the
/// blocking pool. With periodic refresh disabled the task only waits for an
/// interval change or cancellation.
pub fn spawn_refresher(cache: Arc<ListenProcessCache>, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if cache.interval() == RefreshInterval::Disabled {
            info!("periodic listen process refresh disabled, refresh on demand or through http request");
        } else {
            info!("start refresh listen process task");
            run_refresh(&cache, &token).await;
        }

        loop {
            let period = cache.interval().period();
            tokio::select! {
                _ = token.cancelled() => break,
                _ = cache.interval_changed.notified() => {
                    debug!("refresh interval changed to {}s", cache.interval().as_secs());
                }
                _ = wait_period(period) => {
                    run_refresh(&cache, &token).await;
                }
            }
        }

        info!("refresh listen process task stopped");
    })
}

async fn wait_period(period: Option<Duration>) {
    match period {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}

async fn run_refresh(cache: &Arc<ListenProcessCache>, token: &CancellationToken) {
    let cache = cache.clone();
    let token = token.child_token();
    match tokio::task::spawn_blocking(move || cache.refresh(&token)).await {
        Ok(Ok(RefreshOutcome::Refreshed { ports, duration })) => {
            debug!(
                "scheduled refresh completed: {} ports, {:.2}ms",
                ports,
                duration.as_secs_f64() * 1000.0
            );
        }
        Ok(Ok(RefreshOutcome::Skipped)) => {}
        Ok(Err(e)) => error!("scheduled refresh failed: {}", e),
        Err(e) => error!("refresh task panicked: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::symlink;
    use std::path::Path;
    use tempfile::TempDir;

    const HEADER: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n";

    /// Proc tree with pid 42 listening on 3306 and an unowned listener on 22.
    fn fake_proc() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("net")).unwrap();
        fs::write(
            root.join("net/tcp"),
            format!(
                "{HEADER}   0: 00000000:0CEA 00000000:0000 0A 00000000:00000000 00:00000000 00000000   999        0 12345 1 0 100 0 0 10 0\n\
                 \x20  1: 00000000:0016 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 11111 1 0 100 0 0 10 0\n"
            ),
        )
        .unwrap();
        fs::write(root.join("net/tcp6"), HEADER).unwrap();
        let fd = root.join("42/fd");
        fs::create_dir_all(&fd).unwrap();
        symlink("socket:[12345]", fd.join("3")).unwrap();
        tmp
    }

    fn cache_for(root: &Path, secs: i64) -> ListenProcessCache {
        ListenProcessCache::new(
            SocketTableScanner::new(root),
            RefreshInterval::from_secs(secs).unwrap(),
        )
    }

    #[test]
    fn test_interval_validation() {
        assert!(matches!(RefreshInterval::from_secs(4), Err(ExporterError::InvalidInterval(4))));
        assert!(RefreshInterval::from_secs(-2).is_err());
        assert_eq!(RefreshInterval::from_secs(-1).unwrap(), RefreshInterval::Disabled);
        assert_eq!(
            RefreshInterval::from_secs(5).unwrap().period(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(RefreshInterval::default().as_secs(), 60);
    }

    #[test]
    fn test_refresh_debounced_within_interval() {
        let proc = fake_proc();
        let cache = cache_for(proc.path(), 60);
        let token = CancellationToken::new();
        let now = Instant::now();

        let first = cache.refresh_at(now, &token).unwrap();
        assert!(matches!(first, RefreshOutcome::Refreshed { ports: 2, .. }));
        let second = cache.refresh_at(now + Duration::from_secs(1), &token).unwrap();
        assert_eq!(second, RefreshOutcome::Skipped);
        assert_eq!(cache.scan_count(), 1);

        let third = cache.refresh_at(now + Duration::from_secs(61), &token).unwrap();
        assert!(matches!(third, RefreshOutcome::Refreshed { .. }));
        assert_eq!(cache.scan_count(), 2);
    }

    #[test]
    fn test_install_rechecks_debounce_guard() {
        let proc = fake_proc();
        let cache = cache_for(proc.path(), 60);
        let token = CancellationToken::new();
        let t0 = Instant::now();
        cache.refresh_at(t0, &token).unwrap();

        // A scan that passed the guard before t0 was installed loses.
        let late = ListenProcessSnapshot::new();
        assert!(!cache.install(late.clone(), t0 + Duration::from_secs(1)));
        assert!(!cache.install(late.clone(), t0 - Duration::from_secs(1)));
        assert_eq!(cache.last_refresh(), Some(t0));
        assert_eq!(cache.get(3306).map(|p| p.pid), Some(42));

        // Once the window has passed it installs.
        assert!(cache.install(late, t0 + Duration::from_secs(61)));
        assert!(cache.snapshot().is_empty());
    }

    #[test]
    fn test_disabled_install_keeps_newest() {
        let proc = fake_proc();
        let cache = cache_for(proc.path(), DISABLED_REFRESH_INTERVAL);
        let t0 = Instant::now();
        cache.refresh_at(t0, &CancellationToken::new()).unwrap();

        assert!(!cache.install(ListenProcessSnapshot::new(), t0 - Duration::from_secs(1)));
        assert!(cache.install(ListenProcessSnapshot::new(), t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_disabled_interval_always_scans() {
        let proc = fake_proc();
        let cache = cache_for(proc.path(), DISABLED_REFRESH_INTERVAL);
        let token = CancellationToken::new();

        cache.refresh(&token).unwrap();
        cache.refresh(&token).unwrap();
        assert_eq!(cache.scan_count(), 2);
    }

    #[test]
    fn test_failed_refresh_keeps_snapshot_and_timestamp() {
        let proc = fake_proc();
        let cache = cache_for(proc.path(), 60);
        let token = CancellationToken::new();
        let now = Instant::now();

        cache.refresh_at(now, &token).unwrap();
        let before = cache.snapshot();

        fs::remove_file(proc.path().join("net/tcp")).unwrap();
        let later = now + Duration::from_secs(120);
        let err = cache.refresh_at(later, &token).unwrap_err();
        assert!(matches!(err, ExporterError::ScanFailed { .. }));
        assert_eq!(*cache.snapshot(), *before);
        assert_eq!(cache.last_refresh(), Some(now));

        // The failure does not debounce the next attempt.
        fs::write(proc.path().join("net/tcp"), HEADER).unwrap();
        let outcome = cache
            .refresh_at(later + Duration::from_secs(1), &token)
            .unwrap();
        assert!(matches!(outcome, RefreshOutcome::Refreshed { ports: 0, .. }));
        assert_eq!(cache.scan_count(), 3);
    }

    #[test]
    fn test_lookup_hit_miss_and_unowned() {
        let proc = fake_proc();
        let cache = cache_for(proc.path(), 60);

        // First lookup populates the never-refreshed cache.
        assert_eq!(cache.lookup(3306).unwrap(), ListenProcess { pid: 42, port: 3306 });
        assert_eq!(cache.scan_count(), 1);

        let unowned = cache.lookup(22).unwrap();
        assert_eq!(unowned.pid, 0);

        assert!(matches!(cache.lookup(9999), Err(ExporterError::NotFound(9999))));
        // Miss inside the debounce window does not rescan.
        assert_eq!(cache.scan_count(), 1);
    }

    #[test]
    fn test_lookup_propagates_scan_failure() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_for(tmp.path(), 60);
        assert!(matches!(cache.lookup(80), Err(ExporterError::ScanFailed { .. })));
    }

    #[test]
    fn test_set_interval() {
        let proc = fake_proc();
        let cache = cache_for(proc.path(), 60);
        assert!(cache.set_interval(3).is_err());
        assert_eq!(cache.interval().as_secs(), 60);
        cache.set_interval(10).unwrap();
        assert_eq!(cache.interval().period(), Some(Duration::from_secs(10)));
        cache.set_interval(DISABLED_REFRESH_INTERVAL).unwrap();
        assert_eq!(cache.interval(), RefreshInterval::Disabled);
    }

    #[test]
    fn test_health_records_scans() {
        let proc = fake_proc();
        let health = Arc::new(HealthStats::new());
        let cache = cache_for(proc.path(), 60).with_health(health.clone());
        cache.refresh(&CancellationToken::new()).unwrap();
        assert_eq!(health.total_scans(), 1);
        assert_eq!(health.failed_scans(), 0);
    }

    #[tokio::test]
    async fn test_refresher_initial_scan_and_shutdown() {
        let proc = fake_proc();
        let cache = Arc::new(cache_for(proc.path(), 60));
        let token = CancellationToken::new();
        let handle = spawn_refresher(cache.clone(), token.clone());

        for _ in 0..200 {
            if cache.last_refresh().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cache.get(3306).map(|p| p.pid), Some(42));

        token.cancel();
        handle.await.unwrap();
        assert_eq!(cache.scan_count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_refresher_does_not_scan() {
        let proc = fake_proc();
        let cache = Arc::new(cache_for(proc.path(), DISABLED_REFRESH_INTERVAL));
        let token = CancellationToken::new();
        let handle = spawn_refresher(cache.clone(), token.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        handle.await.unwrap();
        assert_eq!(cache.scan_count(), 0);
    }
}
