//! Flush path: `sync()` and `transfer_from()`.
//!
//! `sync` is the only operation that persists staged mutations. Pending
//! entries are grouped by destination bin and each bin is processed on the
//! worker pool under its own lock: read the current shard, overlay the
//! pending entries, write it back, refresh parity. The KVPool is cleared
//! when the sweep finishes — even for bins that failed to flush.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::error;

use crate::{hasher, lock_guard, Engine};

impl Engine {
    /// Flushes every staged entry to its shard and refreshes the affected
    /// parity groups.
    ///
    /// Per-bin failures are logged and do not abort the sweep. The KVPool is
    /// cleared unconditionally at the end: entries whose shard failed to
    /// flush are dropped, not retried. Callers observe durability only
    /// through this method's completion.
    pub fn sync(&self) {
        let mut per_bin: HashMap<usize, HashMap<String, String>> = HashMap::new();
        for entry in self.kv_pool.iter() {
            per_bin
                .entry(hasher::bin_for(entry.key(), self.bin_count))
                .or_default()
                .insert(entry.key().clone(), entry.value().clone());
        }

        self.workers.install(|| {
            per_bin.par_iter().for_each(|(&bin, pending)| {
                if let Err(e) = self.flush_bin(bin, pending) {
                    error!(bin, error = %e, "failed to flush shard");
                }
            });
        });

        self.kv_pool.clear();
    }

    /// Read-modify-write of one bin under its lock.
    fn flush_bin(&self, bin: usize, pending: &HashMap<String, String>) -> Result<()> {
        let lock = self.bin_lock(bin);
        let _guard = lock_guard(&lock);

        let mut records = self.load_bin(bin)?;
        for (disk_key, value) in pending {
            records.insert(disk_key.clone(), value.clone());
        }
        self.store_bin(bin, &records)
    }

    /// Imports every value record from `source` and syncs.
    ///
    /// Equivalent to [`transfer_from_with`](Engine::transfer_from_with)
    /// without index regeneration — the usual choice when the source's index
    /// is not wanted or will be rebuilt separately.
    pub fn transfer_from(&self, source: &Engine) -> Result<()> {
        self.transfer_from_with(source, false)
    }

    /// Imports every value record from `source` into this engine, then
    /// syncs. Posting-list records are not copied; with `generate_ngrams`
    /// set the index is rebuilt from the imported keys instead.
    ///
    /// # Errors
    ///
    /// Propagates read failures from the source engine's shards. This
    /// engine's own flush failures follow the usual `sync` policy (logged,
    /// not returned).
    pub fn transfer_from_with(&self, source: &Engine, generate_ngrams: bool) -> Result<()> {
        let results: Vec<Result<()>> = self.workers.install(|| {
            (0..source.bin_count)
                .into_par_iter()
                .map(|bin| {
                    if !shard::bin_path(&source.dir, bin).exists() {
                        return Ok(());
                    }
                    let records = source
                        .io
                        .read_bin(bin)
                        .with_context(|| format!("reading source bin {bin}"))?;

                    let mut batch = HashMap::new();
                    for (disk_key, value) in records {
                        if let Some(key) = shard::user_key(&disk_key) {
                            batch.insert(key.to_string(), value);
                        }
                    }
                    if !batch.is_empty() {
                        self.set_with(batch, generate_ngrams);
                    }
                    Ok(())
                })
                .collect()
        });
        for result in results {
            result?;
        }

        self.sync();
        Ok(())
    }
}
