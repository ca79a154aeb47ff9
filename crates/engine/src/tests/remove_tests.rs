use super::helpers::*;
use tempfile::tempdir;

// --------------------- Value removal ---------------------

#[test]
fn removed_key_is_gone() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path());
    engine.set(batch(&[("doomed", "v"), ("kept", "v")]));
    engine.sync();

    engine.remove(&keys(&["doomed"]));

    assert!(value_of(&engine, "doomed").is_none());
    assert_eq!(value_of(&engine, "kept").as_deref(), Some("v"));
}

#[test]
fn remove_purges_pending_writes_too() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path());
    engine.set(batch(&[("staged", "v")]));

    engine.remove(&keys(&["staged"]));
    assert!(value_of(&engine, "staged").is_none());

    // A later sync must not resurrect the key.
    engine.sync();
    assert!(value_of(&engine, "staged").is_none());
}

#[test]
fn remove_of_missing_key_is_harmless() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path());
    engine.set(batch(&[("kept", "v")]));
    engine.sync();

    engine.remove(&keys(&["never-existed"]));
    assert_eq!(value_of(&engine, "kept").as_deref(), Some("v"));
}

#[test]
fn remove_before_sync_purges_staged_postings() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path());

    // One value record plus three staged posting lists.
    engine.set(batch(&[("abcdefghij", "X")]));
    assert_eq!(engine.pending_len(), 4);

    engine.remove(&keys(&["abcdefghij"]));
    assert_eq!(engine.pending_len(), 0);

    // Nothing is left for the flush to resurrect.
    engine.sync();
    assert!(value_of(&engine, "abcdefghij").is_none());
    assert!(engine.get(&keys(&["abcdefgh*"])).is_empty());
    assert!(all_disk_records(dir.path(), engine.bin_count()).is_empty());
}

#[test]
fn remove_before_sync_keeps_other_staged_members() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path());

    engine.set(batch(&[("abcdefgh-one", "1"), ("abcdefgh-two", "2")]));
    engine.remove(&keys(&["abcdefgh-one"]));
    engine.sync();

    let found = engine.get(&keys(&["abcdefgh*"]));
    assert_eq!(found.len(), 1);
    assert_eq!(found.get("abcdefgh-two").map(String::as_str), Some("2"));

    for (disk_key, payload) in all_disk_records(dir.path(), engine.bin_count()) {
        if shard::is_gram_key(&disk_key) {
            assert!(
                !ngram::split_posting(&payload).contains(&"abcdefgh-one".to_string()),
                "ghost posting under {disk_key}"
            );
        }
    }
}

// --------------------- Index purging ---------------------

#[test]
fn remove_leaves_no_ghost_postings() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path());
    engine.set(batch(&[("abcdefghij", "X")]));
    engine.sync();

    engine.remove(&keys(&["abcdefghij"]));

    for (disk_key, payload) in all_disk_records(dir.path(), engine.bin_count()) {
        assert_ne!(disk_key, shard::value_key("abcdefghij"));
        if shard::is_gram_key(&disk_key) {
            assert!(
                !ngram::split_posting(&payload).contains(&"abcdefghij".to_string()),
                "ghost posting under {disk_key}"
            );
        }
    }
}

#[test]
fn empty_posting_lists_are_deleted() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path());
    engine.set(batch(&[("abcdefghij", "X")]));
    engine.sync();

    engine.remove(&keys(&["abcdefghij"]));

    // The key was the only member of all its posting lists, so no TRIGRM
    // record survives anywhere.
    assert!(all_disk_records(dir.path(), engine.bin_count())
        .iter()
        .all(|(disk_key, _)| !shard::is_gram_key(disk_key)));
}

#[test]
fn shared_posting_lists_keep_other_members() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path());
    engine.set(batch(&[("abcdefgh-one", "1"), ("abcdefgh-two", "2")]));
    engine.sync();

    engine.remove(&keys(&["abcdefgh-one"]));

    let found = engine.get(&keys(&["abcdefgh*"]));
    assert_eq!(found.len(), 1);
    assert_eq!(found.get("abcdefgh-two").map(String::as_str), Some("2"));
}

#[test]
fn removed_key_is_not_found_by_wildcard() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path());
    engine.set(batch(&[("abcdefghij", "X")]));
    engine.sync();

    engine.remove(&keys(&["abcdefghij"]));

    assert!(engine.get(&keys(&["abcde*ghij"])).is_empty());
    assert!(engine.get(&keys(&["abcdefgh*"])).is_empty());
}

// --------------------- Wildcard removal ---------------------

#[test]
fn wildcard_remove_targets_matching_keys_only() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path());
    engine.set(batch(&[
        ("applepie2024", "A"),
        ("applepie2025", "B"),
        ("orangejuice", "C"),
    ]));
    engine.sync();

    engine.remove(&keys(&["applepie*"]));

    assert!(value_of(&engine, "applepie2024").is_none());
    assert!(value_of(&engine, "applepie2025").is_none());
    assert_eq!(value_of(&engine, "orangejuice").as_deref(), Some("C"));
}

#[test]
fn remove_keeps_shard_files_well_formed() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path());
    engine.set(batch(&[("abcdefghij", "X"), ("unrelatedkey", "Y")]));
    engine.sync();

    engine.remove(&keys(&["abcdefghij"]));

    // Every surviving shard still verifies against its checksum header.
    for bin in 0..engine.bin_count() {
        let path = shard::bin_path(dir.path(), bin);
        if path.exists() {
            shard::read(&path, true).unwrap();
        }
    }
}
