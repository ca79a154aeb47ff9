//! Wildcard-pattern resolution against the 8-gram index.
//!
//! A pattern matches the keys found in **every** posting list of its
//! wildcard-free 8-grams. This is a candidate-set intersection with no final
//! literal-match step: a pattern with fewer than 8 consecutive non-wildcard
//! characters can over-match, and a pattern whose windows all contain the
//! wildcard has no usable grams and matches nothing. Both behaviours are
//! part of the engine's contract.

use std::collections::HashMap;

use crate::Engine;

impl Engine {
    /// Resolves each pattern to the list of currently-indexed keys matching
    /// it. Patterns with no usable 8-grams (or no surviving candidates)
    /// resolve to an empty list.
    pub(crate) fn expand_wildcards(
        &self,
        patterns: &[String],
    ) -> HashMap<String, Vec<String>> {
        patterns
            .iter()
            .map(|pattern| (pattern.clone(), self.matching_keys(pattern)))
            .collect()
    }

    fn matching_keys(&self, pattern: &str) -> Vec<String> {
        let gram_keys: Vec<String> = ngram::key_ngrams(pattern)
            .iter()
            .map(|gram| shard::gram_key(gram))
            .collect();
        if gram_keys.is_empty() {
            return Vec::new();
        }

        // Posting lists come from the KVPool when staged there, otherwise
        // from the shards, batch-read by bin. Staged lists are fresher than
        // anything on disk, so they are overlaid last.
        let mut staged: Vec<(String, String)> = Vec::new();
        let mut unresolved: Vec<String> = Vec::new();
        for gram_key in &gram_keys {
            match self.kv_pool.get(gram_key) {
                Some(entry) => staged.push((gram_key.clone(), entry.value().clone())),
                None => unresolved.push(gram_key.clone()),
            }
        }

        let mut postings: HashMap<String, String> = if unresolved.is_empty() {
            HashMap::new()
        } else {
            self.read_bins_merged(&self.bins_for(&unresolved))
        };
        postings.extend(staged);

        // First list seeds the candidates, later lists restrict them. Grams
        // without a posting list impose no restriction.
        let mut candidates: Vec<String> = Vec::new();
        let mut seeded = false;
        for gram_key in &gram_keys {
            let Some(list) = postings.get(gram_key) else {
                continue;
            };
            let members = ngram::split_posting(list);
            if seeded {
                candidates.retain(|candidate| members.contains(candidate));
            } else {
                seeded = true;
                candidates = members;
            }
            if candidates.len() <= 1 {
                break;
            }
        }
        candidates
    }
}
