use super::helpers::*;
use crate::hasher;
use std::fs;
use tempfile::tempdir;

fn twelve_keys() -> Vec<(String, String)> {
    (0..12)
        .map(|i| (format!("recovery-key-{i:02}"), format!("value-{i}")))
        .collect()
}

/// Bytewise XOR of the given files, zero-extended to the longest.
fn xor_of(paths: &[std::path::PathBuf]) -> Vec<u8> {
    let contents: Vec<Vec<u8>> = paths.iter().map(|p| fs::read(p).unwrap()).collect();
    let max = contents.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = vec![0u8; max];
    for bytes in &contents {
        for (i, b) in bytes.iter().enumerate() {
            out[i] ^= b;
        }
    }
    out
}

/// Asserts `actual` is `expected` plus (at most) a zero tail — the shape a
/// parity reconstruction of a shorter group member takes.
fn assert_zero_extended_eq(actual: &[u8], expected: &[u8]) {
    assert!(actual.len() >= expected.len());
    assert_eq!(&actual[..expected.len()], expected);
    assert!(actual[expected.len()..].iter().all(|&b| b == 0));
}

// --------------------- Parity closure ---------------------

#[test]
fn parity_files_equal_the_xor_of_their_group() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path());
    engine.set(twelve_keys().into_iter().collect());
    engine.sync();

    for group_start in (0..engine.bin_count()).step_by(2) {
        let parity_file = parity::parity_path(dir.path(), group_start, group_start + 1);
        let members: Vec<_> = (group_start..group_start + 2)
            .map(|bin| shard::bin_path(dir.path(), bin))
            .filter(|p| p.exists())
            .collect();
        if members.is_empty() {
            continue;
        }
        assert!(parity_file.exists(), "group {group_start} has no parity");
        assert_eq!(fs::read(&parity_file).unwrap(), xor_of(&members));
    }
}

#[test]
fn parity_disabled_engine_writes_no_parity_files() {
    let dir = tempdir().unwrap();
    let engine = engine_without_parity(dir.path());
    engine.set(twelve_keys().into_iter().collect());
    engine.sync();

    assert!(!fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .any(|e| e.file_name().to_string_lossy().ends_with(".par")));
}

// --------------------- Recovery from deletion ---------------------

#[test]
fn deleted_shard_is_rebuilt_on_read() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path());
    let data = twelve_keys();
    engine.set(data.iter().cloned().collect());
    engine.sync();

    // Pick the bin holding the first key's value record and delete it.
    let (probe_key, probe_value) = &data[0];
    let bin = hasher::bin_for(&shard::value_key(probe_key), engine.bin_count());
    let victim = shard::bin_path(dir.path(), bin);
    let original = fs::read(&victim).unwrap();
    fs::remove_file(&victim).unwrap();

    assert_eq!(value_of(&engine, probe_key).as_deref(), Some(&**probe_value));
    assert_zero_extended_eq(&fs::read(&victim).unwrap(), &original);
}

#[test]
fn every_key_survives_any_single_shard_loss() {
    let dir = tempdir().unwrap();
    let data = twelve_keys();

    for bin in 0..4 {
        let victim = shard::bin_path(dir.path(), bin);
        let engine = engine(dir.path());
        engine.set(data.iter().cloned().collect());
        engine.sync();

        if victim.exists() {
            fs::remove_file(&victim).unwrap();
        }
        for (key, value) in &data {
            assert_eq!(
                value_of(&engine, key).as_deref(),
                Some(&**value),
                "key {key} lost after deleting bin {bin}"
            );
        }
        // Fresh directory for the next round.
        for entry in fs::read_dir(dir.path()).unwrap().filter_map(Result::ok) {
            fs::remove_file(entry.path()).unwrap();
        }
    }
}

#[test]
fn unwritten_member_of_a_written_group_reads_as_empty() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path());

    // A single short key (no grams) writes exactly one bin, leaving its
    // group mate unwritten while the group parity exists.
    engine.set(batch(&[("k", "v")]));
    engine.sync();
    let written = hasher::bin_for(&shard::value_key("k"), 4);
    let group_start = written / 2 * 2;
    let mate = if written == group_start {
        group_start + 1
    } else {
        group_start
    };

    let probe = (0..1000)
        .map(|i| format!("probe-{i}"))
        .find(|p| hasher::bin_for(&shard::value_key(p), 4) == mate)
        .expect("no probe key hashes to the unwritten bin");

    // Reads as absent, not as an error.
    assert!(value_of(&engine, &probe).is_none());

    // And the bin is still perfectly usable afterwards.
    engine.set(batch(&[(probe.as_str(), "now")]));
    engine.sync();
    assert_eq!(value_of(&engine, &probe).as_deref(), Some("now"));
}

// --------------------- Recovery from corruption ---------------------

#[test]
fn corrupted_shard_is_detected_and_rebuilt() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path());
    let data = twelve_keys();
    engine.set(data.iter().cloned().collect());
    engine.sync();

    let (probe_key, probe_value) = &data[0];
    let bin = hasher::bin_for(&shard::value_key(probe_key), engine.bin_count());
    let victim = shard::bin_path(dir.path(), bin);
    let original = fs::read(&victim).unwrap();

    // Flip one byte inside the data region (past the checksum header).
    let mut corrupted = original.clone();
    let pos = corrupted.len() - 3;
    corrupted[pos] ^= 0x01;
    fs::write(&victim, corrupted).unwrap();

    assert_eq!(value_of(&engine, probe_key).as_deref(), Some(&**probe_value));
    assert_zero_extended_eq(&fs::read(&victim).unwrap(), &original);
}

#[test]
fn truncated_shard_is_rebuilt() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path());
    let data = twelve_keys();
    engine.set(data.iter().cloned().collect());
    engine.sync();

    let (probe_key, probe_value) = &data[0];
    let bin = hasher::bin_for(&shard::value_key(probe_key), engine.bin_count());
    let victim = shard::bin_path(dir.path(), bin);
    let original = fs::read(&victim).unwrap();
    fs::write(&victim, &original[..original.len() / 2]).unwrap();

    assert_eq!(value_of(&engine, probe_key).as_deref(), Some(&**probe_value));
}

#[test]
fn corruption_without_parity_loses_the_shard() {
    let dir = tempdir().unwrap();
    let engine = engine_without_parity(dir.path());
    engine.set(batch(&[("somewhere", "v")]));
    engine.sync();

    let bin = hasher::bin_for(&shard::value_key("somewhere"), engine.bin_count());
    let victim = shard::bin_path(dir.path(), bin);
    fs::write(&victim, "").unwrap();

    // No verification, no recovery: the read fails, is logged, and the key
    // is simply absent.
    assert!(value_of(&engine, "somewhere").is_none());
}

// --------------------- Recovery after restart ---------------------

#[test]
fn recovery_works_across_engine_instances() {
    let dir = tempdir().unwrap();
    let data = twelve_keys();
    {
        let engine = engine(dir.path());
        engine.set(data.iter().cloned().collect());
        engine.sync();
    }

    let (probe_key, probe_value) = &data[3];
    let bin = hasher::bin_for(&shard::value_key(probe_key), 4);
    fs::remove_file(shard::bin_path(dir.path(), bin)).unwrap();

    let engine = engine(dir.path());
    assert_eq!(value_of(&engine, probe_key).as_deref(), Some(&**probe_value));
}
