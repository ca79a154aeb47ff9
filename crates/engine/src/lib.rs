//! # Engine - ShoalKV Storage Engine
//!
//! The central orchestrator that ties together the [`shard`], [`parity`],
//! [`ngram`], and [`cache`] crates into a sharded, wildcard-searchable,
//! parity-protected key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌─────────────────────────────────────────────────────┐
//! │                      ENGINE                         │
//! │                                                     │
//! │ write.rs  → set(): stage into KVPool                │
//! │              + merge posting lists into KVPool      │
//! │                                                     │
//! │ sync.rs   → sync(): group KVPool by bin             │
//! │              per bin (worker pool, bin lock):       │
//! │              read shard → overlay → write → parity  │
//! │                                                     │
//! │ read.rs   → get(): KVPool → cache → shard files     │
//! │ wildcard.rs → 8-gram posting-list intersection      │
//! │ remove.rs → purge value records + posting lists     │
//! │                                                     │
//! │ binio.rs  → shard read/write with XOR recovery      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module responsibilities
//!
//! | Module       | Purpose                                                 |
//! |--------------|---------------------------------------------------------|
//! | [`lib.rs`]   | `Engine` struct, constructor, accessors, locks          |
//! | [`binio`]    | Bin I/O: verification, recovery retries, parity refresh |
//! | [`hasher`]   | Polynomial key-to-bin hashing                           |
//! | [`read`]     | `get()`, batched shard reads through the cache          |
//! | [`write`]    | `set()`, posting-list index maintenance                 |
//! | [`remove`]   | `remove()`, posting-list purging                        |
//! | [`sync`]     | `sync()`, `transfer_from()`                             |
//! | [`wildcard`] | wildcard-pattern candidate resolution                   |
//!
//! ## Consistency
//!
//! Mutations are staged in an in-memory pool (the *KVPool*) and only reach
//! disk when [`Engine::sync`] runs; a crash before `sync` returns loses the
//! staged entries. Reads consult the KVPool first, so a writer observes its
//! own unsynced writes. `sync` clears the pool unconditionally, even when
//! individual shards failed to flush — callers that need durability must
//! observe `sync`'s completion.

mod binio;
mod hasher;
mod read;
mod remove;
mod sync;
mod wildcard;
mod write;

use anyhow::{ensure, Result};
use binio::BinIo;
use cache::{BinCache, Loader, Snapshot};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::warn;

pub use ngram::{NGRAM_LEN, WILDCARD};

/// How many parity recoveries a single bin read or write may attempt before
/// the underlying error surfaces.
pub const MAX_RECOVERY_COUNT: usize = 5;

/// Sidecar file (inside the storage directory) persisting the cached bin set.
const CACHE_SIDECAR: &str = "storage.cache";

/// Configuration of the optional read-through bin cache.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Maximum number of cached bins.
    pub capacity: usize,
    /// Cadence of the background refresh.
    pub refresh_interval: Duration,
}

/// The sharded key-value storage engine.
///
/// # Write path
///
/// 1. [`set`](Engine::set) expands wildcard keys against the index and stages
///    value records (plus merged posting lists) into the KVPool.
/// 2. [`sync`](Engine::sync) groups pending entries by destination bin and,
///    per bin under that bin's lock, reads the current shard, overlays the
///    pending entries, writes it back and refreshes the parity group.
///
/// # Read path
///
/// 1. Wildcard keys are expanded into candidate keys via the 8-gram index.
/// 2. Each key is looked up in the KVPool (freshest), then in the bins —
///    read through the cache when one is configured.
///
/// # Recovery
///
/// With parity enabled, every shard read is checksum-verified; a damaged or
/// missing shard is rebuilt from its parity group transparently, bounded by
/// [`MAX_RECOVERY_COUNT`] attempts per operation.
pub struct Engine {
    dir: PathBuf,
    bin_count: usize,
    io: Arc<BinIo>,
    /// Pending mutations, keyed by on-disk key. Drained by `sync`.
    kv_pool: DashMap<String, String>,
    /// One lock per bin, created lazily. Guards the read-modify-write cycle.
    bin_locks: DashMap<usize, Arc<Mutex<()>>>,
    workers: rayon::ThreadPool,
    cache: Option<BinCache>,
}

impl Engine {
    /// Opens (or creates) a storage directory with `bin_count` shards.
    ///
    /// With `enable_parity` set, shard reads verify checksums, every write
    /// refreshes the containing parity group of `parity_group_size` bins,
    /// and failed reads/writes attempt XOR recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the worker
    /// pool fails to start.
    pub fn new(
        dir: impl Into<PathBuf>,
        bin_count: usize,
        enable_parity: bool,
        parity_group_size: usize,
    ) -> Result<Self> {
        Self::build(dir.into(), bin_count, enable_parity, parity_group_size, None)
    }

    /// Like [`new`](Engine::new), with a read-through bin cache in front of
    /// the shard files.
    ///
    /// The cache is seeded from the `storage.cache` sidecar in the storage
    /// directory and warmed once before the engine is returned.
    pub fn with_cache(
        dir: impl Into<PathBuf>,
        bin_count: usize,
        enable_parity: bool,
        parity_group_size: usize,
        cache: CacheOptions,
    ) -> Result<Self> {
        Self::build(
            dir.into(),
            bin_count,
            enable_parity,
            parity_group_size,
            Some(cache),
        )
    }

    fn build(
        dir: PathBuf,
        bin_count: usize,
        enable_parity: bool,
        parity_group_size: usize,
        cache_options: Option<CacheOptions>,
    ) -> Result<Self> {
        ensure!(bin_count > 0, "bin_count must be > 0");
        ensure!(
            !enable_parity || parity_group_size > 0,
            "parity_group_size must be > 0 when parity is enabled"
        );
        std::fs::create_dir_all(&dir)?;

        let io = Arc::new(BinIo::new(dir.clone(), enable_parity, parity_group_size));

        let cache = cache_options.map(|options| {
            let loader_io = Arc::clone(&io);
            let loader: Loader = Arc::new(move |bin| match loader_io.read_bin(bin) {
                Ok(records) => records,
                Err(e) => {
                    warn!(bin, error = %e, "cache refresh failed to read shard");
                    Snapshot::new()
                }
            });
            let cache = BinCache::new(
                dir.join(CACHE_SIDECAR),
                options.capacity,
                options.refresh_interval,
                loader,
            );
            // Bins seeded from the sidecar start with empty snapshots; fill
            // them before the first read goes through the cache.
            cache.refresh();
            cache
        });

        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let workers = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;

        Ok(Self {
            dir,
            bin_count,
            io,
            kv_pool: DashMap::new(),
            bin_locks: DashMap::new(),
            workers,
            cache,
        })
    }

    /// Number of shards. Immutable for the lifetime of the directory.
    #[must_use]
    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    /// The storage directory this engine owns.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether checksum verification and XOR recovery are active.
    #[must_use]
    pub fn parity_enabled(&self) -> bool {
        self.io.parity_enabled()
    }

    /// Number of staged entries (value records plus posting lists) waiting
    /// for the next [`sync`](Engine::sync).
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.kv_pool.len()
    }

    /// The lock serializing read-modify-write cycles on one bin.
    pub(crate) fn bin_lock(&self, bin: usize) -> Arc<Mutex<()>> {
        self.bin_locks
            .entry(bin)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Writes a bin (with parity refresh) and keeps the cache in step.
    ///
    /// `records` is always the bin's complete new contents, so the cached
    /// snapshot is replaced rather than merged — records deleted by the
    /// rewrite must vanish from the cache too, not wait for a refresh tick.
    pub(crate) fn store_bin(&self, bin: usize, records: &Snapshot) -> Result<()> {
        self.io.write_bin(bin, records)?;
        if let Some(cache) = &self.cache {
            cache.replace(bin, records.clone());
        }
        Ok(())
    }

    /// Reads a bin through the cache when one is configured, falling back to
    /// (and re-populating the cache from) the shard file.
    pub(crate) fn load_bin(&self, bin: usize) -> Result<Snapshot> {
        if let Some(cache) = &self.cache {
            if let Some(snapshot) = cache.get(bin) {
                return Ok(snapshot);
            }
            let records = self.io.read_bin(bin)?;
            cache.update(bin, records.clone());
            return Ok(records);
        }
        self.io.read_bin(bin)
    }
}

/// Acquires a `Mutex<()>` guard, recovering from poisoning — the lock
/// protects no data of its own, only a critical section.
pub(crate) fn lock_guard(lock: &Mutex<()>) -> std::sync::MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests;
