//! Write path: `set()` and the posting-list maintenance it triggers.
//!
//! `set` is purely a staging operation — value records land in the KVPool
//! and nothing touches disk until [`Engine::sync`]. Index maintenance reads
//! shards (to merge into existing posting lists) but likewise stages its
//! results back into the KVPool.

use std::collections::HashMap;

use crate::{Engine, WILDCARD};

impl Engine {
    /// Stages a batch of key-value pairs and indexes the new keys.
    ///
    /// Equivalent to [`set_with`](Engine::set_with) with index maintenance
    /// enabled.
    pub fn set(&self, entries: HashMap<String, String>) {
        self.set_with(entries, true);
    }

    /// Stages a batch of key-value pairs.
    ///
    /// A key containing [`WILDCARD`] is not stored literally: it is expanded
    /// against the index and every currently-matching key is staged with the
    /// pattern's value. A pattern matching nothing contributes nothing.
    ///
    /// With `generate_ngrams` set, every non-wildcard input key is merged
    /// into the posting lists of its 8-grams (staged, like the values, until
    /// the next sync). Skipping index maintenance makes the keys invisible
    /// to wildcard lookups — bulk loads that do not need wildcard search use
    /// this to avoid the read-merge cost.
    ///
    /// Never fails: all staging is in-memory, and shard reads done for index
    /// merging treat unreadable shards as empty.
    pub fn set_with(&self, entries: HashMap<String, String>, generate_ngrams: bool) {
        let patterns: Vec<String> = entries
            .keys()
            .filter(|k| k.contains(WILDCARD))
            .cloned()
            .collect();
        let plain: Vec<String> = entries
            .keys()
            .filter(|k| !k.contains(WILDCARD))
            .cloned()
            .collect();

        let expanded = self.expand_wildcards(&patterns);
        for (pattern, matches) in &expanded {
            for target in matches {
                self.kv_pool
                    .insert(shard::value_key(target), entries[pattern].clone());
            }
        }
        for key in &plain {
            self.kv_pool.insert(shard::value_key(key), entries[key].clone());
        }

        if generate_ngrams {
            self.index_keys(&plain);
        }
    }

    /// Merges each key into the posting lists of its 8-grams.
    ///
    /// Per gram: a list already staged in the KVPool is merged in place;
    /// otherwise the current list is fetched from the shards (batch-read by
    /// bin) and the merged result — or a fresh single-member list — is
    /// staged. Keys shorter than 8 characters have no grams and are skipped.
    fn index_keys(&self, keys: &[String]) {
        for key in keys {
            let gram_keys: Vec<String> = ngram::key_ngrams(key)
                .iter()
                .map(|gram| shard::gram_key(gram))
                .collect();

            let mut unresolved = Vec::new();
            for gram_key in &gram_keys {
                match self.kv_pool.get_mut(gram_key) {
                    Some(mut entry) => {
                        if let Some(merged) = ngram::merge_posting(entry.value(), key) {
                            *entry.value_mut() = merged;
                        }
                    }
                    None => unresolved.push(gram_key.clone()),
                }
            }
            if unresolved.is_empty() {
                continue;
            }

            let contents = self.read_bins_merged(&self.bins_for(&unresolved));
            for gram_key in unresolved {
                let list = match contents.get(&gram_key) {
                    Some(list) => {
                        ngram::merge_posting(list, key).unwrap_or_else(|| list.clone())
                    }
                    None => key.clone(),
                };
                self.kv_pool.insert(gram_key, list);
            }
        }
    }
}
