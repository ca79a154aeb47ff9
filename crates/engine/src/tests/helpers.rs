use crate::Engine;
use std::collections::HashMap;
use std::path::Path;

/// The standard test topology: 4 bins, parity groups of 2, parity on.
pub fn engine(dir: &Path) -> Engine {
    Engine::new(dir, 4, true, 2).unwrap()
}

pub fn engine_without_parity(dir: &Path) -> Engine {
    Engine::new(dir, 4, false, 2).unwrap()
}

/// Builds a `set` batch from string pairs.
pub fn batch(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Builds a `get`/`remove` key list.
pub fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|k| k.to_string()).collect()
}

/// The value stored for `key`, if any.
pub fn value_of(engine: &Engine, key: &str) -> Option<String> {
    engine.get(&keys(&[key])).remove(key)
}

/// Every record currently on disk, scanned straight from the bin files.
pub fn all_disk_records(dir: &Path, bins: usize) -> Vec<(String, String)> {
    let mut records = Vec::new();
    for bin in 0..bins {
        let path = shard::bin_path(dir, bin);
        if path.exists() {
            records.extend(shard::read(&path, true).unwrap());
        }
    }
    records
}
