//! The filter graph pool.
//!
//! Building a [`FilterGraph`] is expensive (descriptor parsing, stage
//! resolution, topology validation), and a built graph is stateful and
//! single-user. The pool deduplicates graphs by a structural
//! [`Fingerprint`], enforces at-most-one concurrent user per graph via
//! an exclusive lease protocol, bounds the number of cached graphs with
//! an idle-oldest eviction policy, and expires entries that have been
//! idle past a configurable timeout.
//!
//! # Example
//!
//! ```rust
//! use refract::pool::GraphPool;
//! use refract::frame::{Frame, PixelFormat};
//! use std::time::Duration;
//!
//! let pool = GraphPool::new(4, Duration::from_secs(60));
//! let frame = Frame::new(64, 64, PixelFormat::Rgb24).unwrap();
//!
//! // One-shot processing: lease, push, pull, release.
//! let out = pool.process_frame(&frame, "hflip").unwrap();
//! assert_eq!(out.width(), 64);
//! assert_eq!(pool.size(), 1);
//! ```

use crate::error::{Error, Result};
use crate::filter::{FilterError, FilterGraph, Pull};
use crate::frame::{Frame, PixelFormat};
use crate::observability;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Retry budget for `wait_if_busy` leases.
const LEASE_MAX_RETRIES: u32 = 5;
/// Base back-off delay; doubled on each retry (10, 20, 40, 80, 160 ms).
const LEASE_BACKOFF_BASE_MS: u64 = 10;

/// Default maximum number of cached graphs.
pub const DEFAULT_MAX_SIZE: usize = 100;
/// Default idle expiry timeout.
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(300);

// ============================================================================
// Fingerprint
// ============================================================================

/// The structural key deciding whether two jobs may share a graph.
///
/// Two frames producing equal fingerprints are guaranteed compatible
/// with the same built graph. The descriptor is compared byte-exact;
/// no canonicalization is applied, so descriptors differing only in
/// whitespace are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    descriptor: String,
}

impl Fingerprint {
    /// Build the fingerprint for a frame and descriptor.
    pub fn from_frame(frame: &Frame, descriptor: &str) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            pixel_format: frame.pixel_format(),
            descriptor: descriptor.to_string(),
        }
    }

    /// Frame width this key covers.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height this key covers.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel format this key covers.
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// The filter descriptor, byte-exact.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Process-stable hash used as an eviction tie-break.
    fn stable_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

// ============================================================================
// GraphEntry - one cached graph with lease bookkeeping
// ============================================================================

/// A cached filter graph plus its lease bookkeeping.
///
/// The graph itself is behind a mutex, but the mutex is never
/// contended: the `in_use` flag guarantees at most one lease holder at
/// a time, and only the lease holder touches the graph.
pub struct GraphEntry {
    graph: Mutex<FilterGraph>,
    in_use: AtomicBool,
    use_count: AtomicU64,
    /// Milliseconds since the pool epoch, updated on acquire and release.
    last_used_ms: AtomicU64,
    epoch: Instant,
}

impl GraphEntry {
    /// New entries are born leased: an entry is never visible in the
    /// map as idle-with-zero-uses.
    fn new(graph: FilterGraph, epoch: Instant) -> Self {
        let now = epoch.elapsed().as_millis() as u64;
        Self {
            graph: Mutex::new(graph),
            in_use: AtomicBool::new(true),
            use_count: AtomicU64::new(1),
            last_used_ms: AtomicU64::new(now),
            epoch,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn touch(&self) {
        self.last_used_ms.store(self.elapsed_ms(), Ordering::Release);
    }

    /// Try to take exclusive use of this entry. At most one caller
    /// observes `true` between release points.
    fn acquire(&self) -> bool {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.use_count.fetch_add(1, Ordering::Relaxed);
            self.touch();
            true
        } else {
            false
        }
    }

    /// Give up exclusive use. The caller must have observed a
    /// successful `acquire`.
    fn release(&self) {
        self.in_use.store(false, Ordering::Release);
        self.touch();
    }

    /// Whether this entry is expired. Racy against a concurrent
    /// acquire; the pool re-evaluates under its mutex before removal.
    fn can_cleanup(&self, timeout: Duration) -> bool {
        !self.in_use.load(Ordering::Acquire)
            && self.idle_ms() > timeout.as_millis() as u64
    }

    fn idle_ms(&self) -> u64 {
        self.elapsed_ms()
            .saturating_sub(self.last_used_ms.load(Ordering::Acquire))
    }

    fn last_used(&self) -> u64 {
        self.last_used_ms.load(Ordering::Acquire)
    }

    /// Number of successful leases over this entry's lifetime.
    pub fn use_count(&self) -> u64 {
        self.use_count.load(Ordering::Relaxed)
    }

    /// Whether the entry is currently leased.
    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Time since the last acquire or release.
    pub fn idle_for(&self) -> Duration {
        Duration::from_millis(self.idle_ms())
    }
}

impl std::fmt::Debug for GraphEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphEntry")
            .field("in_use", &self.is_in_use())
            .field("use_count", &self.use_count())
            .field("idle_for", &self.idle_for())
            .finish()
    }
}

// ============================================================================
// GraphLease - RAII exclusive use of one graph
// ============================================================================

/// Exclusive, release-obligated use of one cached graph.
///
/// Returned by [`GraphPool::lease`]; the `acquire` has already been
/// performed on the caller's behalf, and dropping the lease performs
/// the single owed release. The lease keeps the entry alive even if
/// the pool evicts or clears it in the meantime.
pub struct GraphLease {
    entry: Arc<GraphEntry>,
}

impl GraphLease {
    fn new(entry: Arc<GraphEntry>) -> Self {
        Self { entry }
    }

    /// Access the leased graph.
    ///
    /// The lock is uncontended: the lease protocol guarantees this
    /// caller is the only user.
    pub fn graph(&self) -> MutexGuard<'_, FilterGraph> {
        self.entry.graph.lock().unwrap()
    }

    /// Number of successful leases of this graph so far (including
    /// this one).
    pub fn use_count(&self) -> u64 {
        self.entry.use_count()
    }

    /// Identity of the underlying graph, stable for the graph's
    /// lifetime. Two leases of the same cached graph report the same id.
    pub fn graph_id(&self) -> usize {
        Arc::as_ptr(&self.entry) as usize
    }
}

impl Drop for GraphLease {
    fn drop(&mut self) {
        self.entry.release();
    }
}

impl std::fmt::Debug for GraphLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphLease")
            .field("graph_id", &self.graph_id())
            .field("use_count", &self.use_count())
            .finish()
    }
}

// ============================================================================
// GraphPool
// ============================================================================

/// Why an internal lease attempt failed. `lease` collapses these to
/// `None`; `process_frame` keeps build failures distinguishable.
enum LeaseFailure {
    /// Entry exists but stayed busy through the retry budget.
    Busy,
    /// Cache full of in-use graphs; nothing to evict.
    Admission,
    /// Graph construction failed.
    Build(FilterError),
}

struct PoolInner {
    entries: HashMap<Fingerprint, Arc<GraphEntry>>,
    max_size: usize,
}

/// A concurrent, bounded, time-expiring cache of filter graphs.
///
/// See the [module documentation](self) for the full contract.
pub struct GraphPool {
    inner: Mutex<PoolInner>,
    /// Readable without the pool mutex; takes effect on the next sweep.
    cleanup_timeout_ms: AtomicU64,
    epoch: Instant,
}

impl GraphPool {
    /// Create a pool holding at most `max_size` graphs, expiring
    /// entries idle longer than `cleanup_timeout`.
    ///
    /// A pool with `max_size == 0` admits nothing.
    pub fn new(max_size: usize, cleanup_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                entries: HashMap::new(),
                max_size,
            }),
            cleanup_timeout_ms: AtomicU64::new(cleanup_timeout.as_millis() as u64),
            epoch: Instant::now(),
        }
    }

    /// Lease a graph compatible with `frame` + `descriptor`, with the
    /// caller as its exclusive user.
    ///
    /// On a hit the cached graph is acquired; if it is busy and
    /// `wait_if_busy` is set, the pool retries with exponential
    /// back-off (10, 20, 40, 80, 160 ms) before giving up. On a miss a
    /// new graph is built — evicting the oldest idle entry first if the
    /// pool is full — and inserted already leased.
    ///
    /// Returns `None` on busy-without-wait, retry exhaustion, admission
    /// failure (only in-use entries to evict) or build failure. The
    /// released lease must not outlive intended use: dropping it is the
    /// release.
    pub fn lease(
        &self,
        frame: &Frame,
        descriptor: &str,
        wait_if_busy: bool,
    ) -> Option<GraphLease> {
        self.lease_inner(frame, descriptor, wait_if_busy).ok()
    }

    fn lease_inner(
        &self,
        frame: &Frame,
        descriptor: &str,
        wait_if_busy: bool,
    ) -> std::result::Result<GraphLease, LeaseFailure> {
        let fingerprint = Fingerprint::from_frame(frame, descriptor);
        let mut inner = self.inner.lock().unwrap();

        if let Some(entry) = inner.entries.get(&fingerprint) {
            if entry.acquire() {
                trace!(?fingerprint, "lease hit");
                observability::record_lease_hit();
                return Ok(GraphLease::new(Arc::clone(entry)));
            }
            if !wait_if_busy {
                return Err(LeaseFailure::Busy);
            }
            return self.lease_backoff(inner, &fingerprint);
        }

        // Miss. Make room while still holding the mutex, then drop it
        // across the expensive graph construction.
        if !Self::make_room(&mut inner, self.cleanup_timeout()) {
            debug!(?fingerprint, "admission failure: all entries in use");
            return Err(LeaseFailure::Admission);
        }
        drop(inner);

        let graph = FilterGraph::build(
            frame.width(),
            frame.height(),
            frame.pixel_format(),
            descriptor,
        )
        .map_err(|e| {
            warn!(?fingerprint, error = %e, "filter graph construction failed");
            LeaseFailure::Build(e)
        })?;
        observability::record_graph_built();

        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.entries.get(&fingerprint) {
            // Another thread inserted the same fingerprint while our
            // graph was under construction; ours is discarded.
            let existing = Arc::clone(existing);
            if existing.acquire() {
                return Ok(GraphLease::new(existing));
            }
            if !wait_if_busy {
                return Err(LeaseFailure::Busy);
            }
            return self.lease_backoff(inner, &fingerprint);
        }
        // The map may have filled up again while the mutex was dropped.
        if !Self::make_room(&mut inner, self.cleanup_timeout()) {
            return Err(LeaseFailure::Admission);
        }

        // Inserted already leased: never visible as idle-with-zero-uses.
        let entry = Arc::new(GraphEntry::new(graph, self.epoch));
        inner.entries.insert(fingerprint, Arc::clone(&entry));
        observability::record_pool_entries(inner.entries.len());
        Ok(GraphLease::new(entry))
    }

    /// Exponential back-off on a busy entry. Drops the pool mutex
    /// across each sleep and re-looks up the fingerprint afterwards
    /// (the entry may have been evicted meanwhile).
    fn lease_backoff<'a>(
        &'a self,
        mut inner: MutexGuard<'a, PoolInner>,
        fingerprint: &Fingerprint,
    ) -> std::result::Result<GraphLease, LeaseFailure> {
        for retry in 0..LEASE_MAX_RETRIES {
            drop(inner);
            let delay = Duration::from_millis(LEASE_BACKOFF_BASE_MS << retry);
            trace!(retry, ?delay, "graph busy, backing off");
            std::thread::sleep(delay);

            inner = self.inner.lock().unwrap();
            if let Some(entry) = inner.entries.get(fingerprint) {
                if entry.acquire() {
                    observability::record_lease_hit();
                    return Ok(GraphLease::new(Arc::clone(entry)));
                }
            }
        }
        debug!(?fingerprint, "lease retries exhausted");
        Err(LeaseFailure::Busy)
    }

    /// Ensure there is room for one more entry. Sweeps expired entries
    /// first, then evicts idle entries oldest-first. Returns false if
    /// only in-use entries remain.
    fn make_room(inner: &mut PoolInner, timeout: Duration) -> bool {
        if inner.entries.len() < inner.max_size {
            return true;
        }
        Self::sweep_locked(inner, timeout);
        while inner.entries.len() >= inner.max_size {
            if !Self::evict_oldest_idle(inner) {
                return false;
            }
        }
        true
    }

    /// Evict the idle entry with the oldest `last_used`. Ties break on
    /// the fingerprint's hash, then its field order, so eviction is
    /// deterministic for a given pool state.
    fn evict_oldest_idle(inner: &mut PoolInner) -> bool {
        let victim = inner
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_in_use())
            .min_by(|(ka, ea), (kb, eb)| {
                ea.last_used()
                    .cmp(&eb.last_used())
                    .then_with(|| ka.stable_hash().cmp(&kb.stable_hash()))
                    .then_with(|| ka.cmp(kb))
            })
            .map(|(key, _)| key.clone());

        match victim {
            Some(key) => {
                inner.entries.remove(&key);
                debug!(fingerprint = ?key, "evicted idle filter graph");
                observability::record_graph_evicted();
                true
            }
            None => false,
        }
    }

    fn sweep_locked(inner: &mut PoolInner, timeout: Duration) -> usize {
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.can_cleanup(timeout));
        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!(removed, "swept expired filter graphs");
            observability::record_graphs_swept(removed);
        }
        removed
    }

    /// One-shot processing: lease with `wait_if_busy`, push `input`
    /// into the graph's source (the caller keeps its frame), pull the
    /// filtered frame from the sink, release the lease on every path.
    ///
    /// Filter errors are forwarded unmodified inside
    /// [`Error::Filter`]; an exhausted or unadmittable pool reports
    /// [`Error::PoolExhausted`].
    pub fn process_frame(&self, input: &Frame, descriptor: &str) -> Result<Frame> {
        let start = Instant::now();
        let lease = self
            .lease_inner(input, descriptor, true)
            .map_err(|failure| match failure {
                LeaseFailure::Busy | LeaseFailure::Admission => Error::PoolExhausted,
                LeaseFailure::Build(e) => Error::Filter(e),
            })?;

        let output = {
            let mut graph = lease.graph();
            graph.push_frame(input)?;
            match graph.pull_frame()? {
                Pull::Frame(frame) => frame,
                Pull::Again => return Err(Error::Filter(FilterError::TryAgain)),
                Pull::Eos => return Err(Error::Filter(FilterError::Eos)),
            }
        };

        observability::record_filter_time(start.elapsed());
        Ok(output)
    }

    /// Remove every entry idle longer than the cleanup timeout.
    /// Returns the number removed. Never removes an in-use entry.
    pub fn sweep_expired(&self) -> usize {
        let timeout = self.cleanup_timeout();
        let mut inner = self.inner.lock().unwrap();
        let removed = Self::sweep_locked(&mut inner, timeout);
        observability::record_pool_entries(inner.entries.len());
        removed
    }

    /// Remove every entry. Leased graphs stay alive through their
    /// lease's shared reference and are freed on release.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.entries.len();
        inner.entries.clear();
        observability::record_pool_entries(0);
        debug!(removed, "cleared graph pool");
    }

    /// Current number of cached graphs.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Maximum number of cached graphs.
    pub fn max_size(&self) -> usize {
        self.inner.lock().unwrap().max_size
    }

    /// Shrink or grow the capacity. When shrinking below the current
    /// size, expired entries are swept and idle entries evicted
    /// oldest-first; if in-use entries still exceed the new capacity
    /// the operation fails and the capacity is unchanged.
    pub fn set_max_size(&self, new_max: usize) -> bool {
        let timeout = self.cleanup_timeout();
        let mut inner = self.inner.lock().unwrap();
        if new_max < inner.entries.len() {
            Self::sweep_locked(&mut inner, timeout);
            while inner.entries.len() > new_max {
                if !Self::evict_oldest_idle(&mut inner) {
                    warn!(
                        new_max,
                        size = inner.entries.len(),
                        "cannot shrink pool: in-use graphs remain"
                    );
                    return false;
                }
            }
            observability::record_pool_entries(inner.entries.len());
        }
        inner.max_size = new_max;
        true
    }

    /// Current idle expiry timeout. Readable without the pool mutex.
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms.load(Ordering::Acquire))
    }

    /// Change the idle expiry timeout; takes effect on the next sweep.
    pub fn set_cleanup_timeout(&self, timeout: Duration) {
        self.cleanup_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Release);
    }

    /// Aggregate counters for the pool.
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().unwrap();
        let in_use = inner.entries.values().filter(|e| e.is_in_use()).count();
        let total_use_count = inner.entries.values().map(|e| e.use_count()).sum();
        PoolStats {
            size: inner.entries.len(),
            max_size: inner.max_size,
            in_use,
            total_use_count,
            cleanup_timeout: self.cleanup_timeout(),
        }
    }

    /// Per-entry diagnostic listing.
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .iter()
            .map(|(key, entry)| EntrySnapshot {
                width: key.width(),
                height: key.height(),
                pixel_format: key.pixel_format(),
                descriptor: key.descriptor().to_string(),
                use_count: entry.use_count(),
                in_use: entry.is_in_use(),
                idle_for: entry.idle_for(),
            })
            .collect()
    }

    /// Log the cache status at info level, one line per entry.
    pub fn log_status(&self) {
        let stats = self.stats();
        info!(
            size = stats.size,
            max_size = stats.max_size,
            in_use = stats.in_use,
            total_use_count = stats.total_use_count,
            cleanup_timeout_secs = stats.cleanup_timeout.as_secs(),
            "graph pool status"
        );
        for entry in self.snapshot() {
            info!(
                width = entry.width,
                height = entry.height,
                pixel_format = ?entry.pixel_format,
                descriptor = %entry.descriptor,
                use_count = entry.use_count,
                in_use = entry.in_use,
                idle_secs = entry.idle_for.as_secs(),
                "graph pool entry"
            );
        }
    }
}

impl Default for GraphPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_CLEANUP_TIMEOUT)
    }
}

impl std::fmt::Debug for GraphPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("GraphPool")
            .field("size", &stats.size)
            .field("max_size", &stats.max_size)
            .field("in_use", &stats.in_use)
            .finish()
    }
}

/// Aggregate pool counters, snapshot under the pool mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Current number of cached graphs.
    pub size: usize,
    /// Capacity.
    pub max_size: usize,
    /// Entries currently leased.
    pub in_use: usize,
    /// Sum of all entries' use counts.
    pub total_use_count: u64,
    /// Current idle expiry timeout.
    pub cleanup_timeout: Duration,
}

/// Diagnostic view of one cached graph.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    /// Frame width of the fingerprint.
    pub width: u32,
    /// Frame height of the fingerprint.
    pub height: u32,
    /// Pixel format of the fingerprint.
    pub pixel_format: PixelFormat,
    /// Filter descriptor of the fingerprint.
    pub descriptor: String,
    /// Lifetime lease count.
    pub use_count: u64,
    /// Whether the entry is currently leased.
    pub in_use: bool,
    /// Time since last acquire or release.
    pub idle_for: Duration,
}
