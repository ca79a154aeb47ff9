//! # NGram - Substring Index Primitives
//!
//! Pure helpers for the wildcard-search index of the ShoalKV storage engine.
//!
//! Every stored key at least [`NGRAM_LEN`] characters long is decomposed into
//! its contiguous 8-character substrings ("8-grams"). Each 8-gram owns a
//! *posting list* — a comma-joined list of the user keys containing it —
//! stored in the shard files alongside the value records. A wildcard query is
//! answered by intersecting the posting lists of its non-wildcard 8-grams.
//!
//! This crate does no I/O: it only generates 8-grams and manipulates posting
//! lists as strings. Where the lists live and how they are fetched is the
//! engine's business.
//!
//! ## Example
//!
//! ```rust
//! use ngram::{key_ngrams, merge_posting, split_posting};
//!
//! let grams = key_ngrams("abcdefghi");
//! assert_eq!(grams, vec!["abcdefgh", "bcdefghi"]);
//!
//! let list = merge_posting("alpha,beta", "gamma").unwrap();
//! assert_eq!(split_posting(&list), vec!["alpha", "beta", "gamma"]);
//! ```

/// Window length for index substrings.
pub const NGRAM_LEN: usize = 8;

/// Character that marks a query key (or a window) as non-literal.
pub const WILDCARD: char = '*';

/// Generates the distinct n-grams of `input` with a sliding window of `n`
/// characters, preserving first-occurrence order.
///
/// Windows containing `skip` are dropped, so wildcard query keys never
/// contribute wildcard-tainted grams. Inputs shorter than `n` characters
/// (or `n == 0`) yield no grams at all.
pub fn ngrams(input: &str, n: usize, skip: Option<char>) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();
    if n == 0 || chars.len() < n {
        return Vec::new();
    }

    let mut grams: Vec<String> = Vec::new();
    for window in chars.windows(n) {
        if let Some(c) = skip {
            if window.contains(&c) {
                continue;
            }
        }
        let gram: String = window.iter().collect();
        if !grams.contains(&gram) {
            grams.push(gram);
        }
    }
    grams
}

/// The 8-grams of a key as used by the index: [`NGRAM_LEN`]-character
/// windows, skipping any window containing [`WILDCARD`].
pub fn key_ngrams(key: &str) -> Vec<String> {
    ngrams(key, NGRAM_LEN, Some(WILDCARD))
}

/// Splits a comma-joined posting list into its member keys.
///
/// Whitespace around commas is tolerated (`"a, b"` parses as `["a", "b"]`);
/// empty segments are dropped, so an empty input yields an empty list.
pub fn split_posting(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Joins member keys back into the on-disk posting-list payload.
pub fn join_posting(keys: &[String]) -> String {
    keys.join(",")
}

/// Appends `key` to a posting list if it is not already a member.
///
/// Returns the merged list, or `None` when the list already contains `key`
/// (no write needed). An empty list merges to just `key`.
pub fn merge_posting(list: &str, key: &str) -> Option<String> {
    let members = split_posting(list);
    if members.iter().any(|m| m == key) {
        return None;
    }
    if members.is_empty() {
        Some(key.to_string())
    } else {
        Some(format!("{list},{key}"))
    }
}

/// Removes every key in `remove` from a posting list, returning the
/// surviving members. An empty result means the posting record itself
/// should be deleted.
pub fn remove_from_posting(list: &str, remove: &[String]) -> Vec<String> {
    split_posting(list)
        .into_iter()
        .filter(|m| !remove.iter().any(|r| r == m))
        .collect()
}
