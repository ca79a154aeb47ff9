//! Removal path: deleting value records and purging the index.
//!
//! Unlike `set`, removal rewrites the affected shards directly (under their
//! bin locks) instead of staging through the KVPool — a deleted key must not
//! linger on disk until someone happens to sync. Pending KVPool entries for
//! the deleted keys are dropped as well so the next sync cannot resurrect
//! them.

use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::{hasher, lock_guard, Engine, WILDCARD};

impl Engine {
    /// Removes a batch of keys: their value records, their pending KVPool
    /// entries, and their membership in every posting list.
    ///
    /// Keys containing [`WILDCARD`] are expanded against the index first;
    /// all currently-matching keys become removal targets. A posting list
    /// left empty by the purge is deleted outright.
    ///
    /// I/O failures are logged per shard and do not abort the sweep.
    pub fn remove(&self, keys: &[String]) {
        let patterns: Vec<String> = keys
            .iter()
            .filter(|k| k.contains(WILDCARD))
            .cloned()
            .collect();
        let expanded = self.expand_wildcards(&patterns);

        let mut targets: Vec<String> = keys
            .iter()
            .filter(|k| !k.contains(WILDCARD))
            .cloned()
            .collect();
        for matches in expanded.values() {
            targets.extend(matches.iter().cloned());
        }

        self.purge_pool(&targets);

        // Every target contributes its value record plus all its posting
        // records to the per-bin work sets.
        let mut per_bin: HashMap<usize, HashSet<String>> = HashMap::new();
        for target in &targets {
            let value_key = shard::value_key(target);
            per_bin
                .entry(hasher::bin_for(&value_key, self.bin_count))
                .or_default()
                .insert(value_key);
            for gram in ngram::key_ngrams(target) {
                let gram_key = shard::gram_key(&gram);
                per_bin
                    .entry(hasher::bin_for(&gram_key, self.bin_count))
                    .or_default()
                    .insert(gram_key);
            }
        }

        self.workers.install(|| {
            per_bin.par_iter().for_each(|(&bin, disk_keys)| {
                if let Err(e) = self.purge_bin(bin, disk_keys, &targets) {
                    warn!(bin, error = %e, "failed to update shard during remove");
                }
            });
        });
    }

    /// Drops the targets from the KVPool: their pending value records, and
    /// their membership in any posting list staged by an unsynced `set` —
    /// otherwise the next sync would flush ghost postings for keys that no
    /// longer exist.
    fn purge_pool(&self, targets: &[String]) {
        for target in targets {
            self.kv_pool.remove(&shard::value_key(target));
            for gram in ngram::key_ngrams(target) {
                let gram_key = shard::gram_key(&gram);
                let survivors = match self.kv_pool.get(&gram_key) {
                    Some(entry) => ngram::remove_from_posting(entry.value(), targets),
                    None => continue,
                };
                if survivors.is_empty() {
                    self.kv_pool.remove(&gram_key);
                } else {
                    self.kv_pool.insert(gram_key, ngram::join_posting(&survivors));
                }
            }
        }
    }

    /// Rewrites one bin with the given disk keys purged. Runs under the bin
    /// lock; the write is skipped when nothing actually changed.
    fn purge_bin(
        &self,
        bin: usize,
        disk_keys: &HashSet<String>,
        targets: &[String],
    ) -> anyhow::Result<()> {
        let lock = self.bin_lock(bin);
        let _guard = lock_guard(&lock);

        let mut records = self.io.read_bin(bin)?;
        let mut changed = false;
        for disk_key in disk_keys {
            if shard::is_value_key(disk_key) {
                changed |= records.remove(disk_key).is_some();
            } else if let Some(list) = records.get(disk_key) {
                let members = ngram::split_posting(list);
                let survivors = ngram::remove_from_posting(list, targets);
                if survivors.len() == members.len() {
                    continue;
                }
                if survivors.is_empty() {
                    records.remove(disk_key);
                } else {
                    records.insert(disk_key.clone(), ngram::join_posting(&survivors));
                }
                changed = true;
            }
        }

        if changed {
            self.store_bin(bin, &records)?;
        }
        Ok(())
    }
}
