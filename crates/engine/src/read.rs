//! Read path: `get()` and the batched shard reads shared with the index
//! maintenance code.
//!
//! Lookups go KVPool → cache → shard file. The KVPool holds the freshest
//! state (unsynced writes), so it always wins; everything else is fetched by
//! fanning the deduplicated bin list out over the worker pool.

use rayon::prelude::*;
use std::collections::HashMap;
use tracing::warn;

use crate::{hasher, Engine, WILDCARD};

impl Engine {
    /// Looks up a batch of keys, returning only the ones that were found.
    ///
    /// Keys containing [`WILDCARD`] are expanded into the currently-indexed
    /// keys matching them (8-gram candidate intersection — see the wildcard
    /// module) and the matches are fetched like ordinary keys.
    ///
    /// I/O failures are logged per shard; keys in an unreadable shard are
    /// simply absent from the result.
    pub fn get(&self, keys: &[String]) -> HashMap<String, String> {
        let patterns: Vec<String> = keys
            .iter()
            .filter(|k| k.contains(WILDCARD))
            .cloned()
            .collect();
        let expanded = self.expand_wildcards(&patterns);

        let mut lookups: Vec<String> = keys
            .iter()
            .filter(|k| !k.contains(WILDCARD))
            .cloned()
            .collect();
        for matches in expanded.values() {
            lookups.extend(matches.iter().cloned());
        }

        // KVPool first: unsynced writes shadow whatever is on disk.
        let mut found = HashMap::new();
        let mut from_shards = Vec::new();
        for key in lookups {
            match self.kv_pool.get(&shard::value_key(&key)) {
                Some(entry) => {
                    found.insert(key, entry.value().clone());
                }
                None => from_shards.push(key),
            }
        }

        if !from_shards.is_empty() {
            let disk_keys: Vec<String> =
                from_shards.iter().map(|k| shard::value_key(k)).collect();
            let contents = self.read_bins_merged(&self.bins_for(&disk_keys));
            for key in from_shards {
                if let Some(value) = contents.get(&shard::value_key(&key)) {
                    found.insert(key, value.clone());
                }
            }
        }

        found
    }

    /// The distinct bins the given on-disk keys hash to, in first-seen order.
    pub(crate) fn bins_for(&self, disk_keys: &[String]) -> Vec<usize> {
        let mut bins = Vec::new();
        for disk_key in disk_keys {
            let bin = hasher::bin_for(disk_key, self.bin_count);
            if !bins.contains(&bin) {
                bins.push(bin);
            }
        }
        bins
    }

    /// Reads the given bins in parallel and merges their contents into one
    /// map. Unreadable bins are logged and skipped.
    pub(crate) fn read_bins_merged(&self, bins: &[usize]) -> HashMap<String, String> {
        let snapshots: Vec<Option<HashMap<String, String>>> = self.workers.install(|| {
            bins.par_iter()
                .map(|&bin| match self.load_bin(bin) {
                    Ok(records) => Some(records),
                    Err(e) => {
                        warn!(bin, error = %e, "failed to read shard");
                        None
                    }
                })
                .collect()
        });

        let mut merged = HashMap::new();
        for records in snapshots.into_iter().flatten() {
            merged.extend(records);
        }
        merged
    }
}
