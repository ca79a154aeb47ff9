//! # Cache - Read-Through Bin Cache
//!
//! A bounded, *approximately* LRU cache of decoded shard contents, keyed by
//! bin index, sitting between the ShoalKV engine and its shard files.
//!
//! ## Replacement policy
//!
//! The policy is intentionally not true LRU — it trades recency fidelity for
//! constant-time bookkeeping, and its observable behaviour is part of the
//! engine's contract:
//!
//! - a hit promotes the entry exactly **one** position toward the head;
//! - a brand-new entry is inserted at the **middle** of the order;
//! - when the bound is exceeded, the **tail** entry is evicted.
//!
//! ## Sidecar and refresh
//!
//! The set of cached bins persists across restarts in a `.cache` sidecar
//! file: comma-separated decimal bin indices, parsed leniently (whitespace
//! trimmed, unparsable tokens logged and skipped, duplicates collapsed).
//! A background thread re-reads every cached bin through an injected loader
//! on a fixed cadence and rewrites the sidecar with the current order.
//!
//! ## Locking
//!
//! All cache state lives in one per-instance struct behind a `Mutex`, so
//! `get`, `update` and the periodic refresh are mutually exclusive. The
//! refresher uses `try_lock` and skips its tick when the cache is busy
//! rather than queueing behind foreground traffic.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::warn;

/// Decoded contents of one shard file: on-disk key to payload.
pub type Snapshot = HashMap<String, String>;

/// Re-reads the current contents of a bin for the background refresh.
pub type Loader = Arc<dyn Fn(usize) -> Snapshot + Send + Sync>;

/// How long `Drop` waits for an in-flight refresh before detaching the
/// refresher thread.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Cache order and snapshots. `order[0]` is the most recent entry;
/// `snapshots` has a binding for every element of `order` and nothing else.
struct CacheState {
    order: Vec<usize>,
    snapshots: HashMap<usize, Snapshot>,
}

struct Shared {
    state: Mutex<CacheState>,
    stop: Mutex<bool>,
    stop_signal: Condvar,
}

/// Bounded read-through cache of bin contents with a periodic refresher.
pub struct BinCache {
    shared: Arc<Shared>,
    loader: Loader,
    sidecar: PathBuf,
    capacity: usize,
    refresher: Option<JoinHandle<()>>,
}

impl BinCache {
    /// Creates a cache seeded from the sidecar file (created empty if
    /// missing) and starts the background refresher.
    ///
    /// Bins listed in the sidecar start with empty snapshots; the first
    /// refresh tick fills them through `loader`.
    pub fn new(
        sidecar: impl Into<PathBuf>,
        capacity: usize,
        refresh_interval: Duration,
        loader: Loader,
    ) -> Self {
        let sidecar = sidecar.into();
        let order = load_sidecar(&sidecar);
        let snapshots = order.iter().map(|&bin| (bin, Snapshot::new())).collect();

        let shared = Arc::new(Shared {
            state: Mutex::new(CacheState { order, snapshots }),
            stop: Mutex::new(false),
            stop_signal: Condvar::new(),
        });

        let refresher = {
            let shared = Arc::clone(&shared);
            let loader = Arc::clone(&loader);
            let sidecar = sidecar.clone();
            thread::spawn(move || loop {
                let stopped = shared
                    .stop
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let (stopped, _) = shared
                    .stop_signal
                    .wait_timeout(stopped, refresh_interval)
                    .unwrap_or_else(PoisonError::into_inner);
                if *stopped {
                    break;
                }
                drop(stopped);
                refresh_tick(&shared, &loader, &sidecar);
            })
        };

        Self {
            shared,
            loader,
            sidecar,
            capacity,
            refresher: Some(refresher),
        }
    }

    /// Looks up the cached snapshot of a bin.
    ///
    /// A hit promotes the entry one position toward the head of the order
    /// and returns a copy of the snapshot; a miss returns `None` and leaves
    /// the order untouched.
    pub fn get(&self, bin: usize) -> Option<Snapshot> {
        let mut state = self.lock_state();
        let index = state.order.iter().position(|&b| b == bin)?;
        if index > 0 {
            state.order.swap(index - 1, index);
        }
        state.snapshots.get(&bin).cloned()
    }

    /// Records fresh contents for a bin.
    ///
    /// A known bin has `data` merged into its existing snapshot (new keys
    /// win). An unknown bin is inserted at the middle of the order; if that
    /// pushes the cache over capacity, the tail entry is evicted.
    pub fn update(&self, bin: usize, data: Snapshot) {
        let mut state = self.lock_state();
        if let Some(snapshot) = state.snapshots.get_mut(&bin) {
            snapshot.extend(data);
            return;
        }
        self.insert_at_middle(&mut state, bin, data);
    }

    /// Replaces a bin's snapshot outright.
    ///
    /// A known bin keeps its position in the order but swaps the whole
    /// snapshot — entries absent from `data` are dropped, which is what a
    /// full shard rewrite needs (a merge would keep records that the rewrite
    /// deleted). An unknown bin is inserted like [`update`](BinCache::update).
    pub fn replace(&self, bin: usize, data: Snapshot) {
        let mut state = self.lock_state();
        if let Some(snapshot) = state.snapshots.get_mut(&bin) {
            *snapshot = data;
            return;
        }
        self.insert_at_middle(&mut state, bin, data);
    }

    /// The insertion half of the replacement policy: new bins land at the
    /// middle of the order, and overflow evicts the tail.
    fn insert_at_middle(&self, state: &mut CacheState, bin: usize, data: Snapshot) {
        let middle = state.order.len() / 2;
        state.order.insert(middle, bin);
        state.snapshots.insert(bin, data);
        if state.order.len() > self.capacity {
            if let Some(evicted) = state.order.pop() {
                state.snapshots.remove(&evicted);
            }
        }
    }

    /// Runs one refresh cycle on the caller's thread: re-reads every cached
    /// bin through the loader and rewrites the sidecar. Skipped entirely if
    /// the cache is busy. Exposed so tests (and callers that just synced)
    /// need not wait for the timer.
    pub fn refresh(&self) {
        refresh_tick(&self.shared, &self.loader, &self.sidecar);
    }

    /// The bins currently cached, head (most recent) first.
    #[must_use]
    pub fn bins(&self) -> Vec<usize> {
        self.lock_state().order.clone()
    }

    /// Number of cached bins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_state().order.len()
    }

    /// Whether the cache holds no bins.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for BinCache {
    fn drop(&mut self) {
        *self
            .shared
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = true;
        self.shared.stop_signal.notify_all();

        if let Some(handle) = self.refresher.take() {
            let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
            // A refresh still running past the deadline is abandoned; the
            // thread exits on its own once the loader returns.
        }
    }
}

/// One refresh cycle. Uses `try_lock` so a busy cache skips the tick
/// instead of stalling foreground `get`/`update` traffic.
fn refresh_tick(shared: &Shared, loader: &Loader, sidecar: &Path) {
    let Ok(mut state) = shared.state.try_lock() else {
        return;
    };

    for bin in state.order.clone() {
        let fresh = loader(bin);
        state.snapshots.insert(bin, fresh);
    }

    let line = state
        .order
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    if let Err(e) = fs::write(sidecar, line) {
        warn!(path = %sidecar.display(), error = %e, "failed to rewrite cache sidecar");
    }
}

/// Parses the sidecar into an ordered, duplicate-free bin list. Tokens are
/// comma-separated decimal integers; lines, stray whitespace and unparsable
/// tokens are tolerated.
fn load_sidecar(path: &Path) -> Vec<usize> {
    if !path.exists() {
        if let Err(e) = fs::write(path, "") {
            warn!(path = %path.display(), error = %e, "failed to create cache sidecar");
        }
        return Vec::new();
    }

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read cache sidecar");
            return Vec::new();
        }
    };

    let mut bins = Vec::new();
    for token in raw.split(|c| c == ',' || c == '\n') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match token.parse::<usize>() {
            Ok(bin) => {
                if !bins.contains(&bin) {
                    bins.push(bin);
                }
            }
            Err(_) => {
                warn!(token, "skipping unparsable cache sidecar token");
            }
        }
    }
    bins
}
