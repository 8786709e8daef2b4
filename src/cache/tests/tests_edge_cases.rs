use crate::cache::tests::{fresh, init_tracing, k, lookup_vec, with_manifest};
use crate::error::ItemCacheError;
use crate::segment::testing::FakeManifest;

#[test]
fn repeated_lookup_of_a_covered_miss_does_not_re_read_the_manifest() {
    init_tracing();

    let cache = with_manifest(FakeManifest::new());
    let mut buf = [0u8; 8];
    assert!(matches!(cache.lookup(b"c", &mut buf), Err(ItemCacheError::NotFound)));
    assert!(matches!(cache.lookup(b"c", &mut buf), Err(ItemCacheError::NotFound)));
    assert_eq!(cache.manifest().reads_count(), 1);
}

#[test]
fn lookup_miss_triggers_manifest_read_that_finds_the_item() {
    init_tracing();

    let manifest = FakeManifest::new().with_item("m", "found-it");
    let cache = with_manifest(manifest);
    assert_eq!(lookup_vec(&cache, b"m", 16), b"found-it");
}

#[test]
fn next_returns_successor_skipping_tombstones() {
    init_tracing();

    let cache = fresh();
    cache.create(b"b", b"B").unwrap();
    cache.create(b"a", b"A").unwrap();
    cache.create(b"d", b"D").unwrap();
    cache.delete(b"b").unwrap();

    // successor of "a" is "b", but "b" is a tombstone: skip to "d".
    assert_eq!(lookup_next(&cache, b"a", b"z"), b"D".to_vec());
}

fn lookup_next(cache: &crate::cache::ItemCache<FakeManifest, crate::segment::testing::RecordingSegment>, key: &[u8], last: &[u8]) -> Vec<u8> {
    let mut buf = [0u8; 16];
    let n = cache.next(key, last, &mut buf).expect("next");
    buf[..n].to_vec()
}

#[test]
fn next_with_key_after_last_returns_not_found_without_reading_manifest() {
    init_tracing();

    let manifest = FakeManifest::new();
    let cache = with_manifest(manifest);
    let mut buf = [0u8; 8];
    assert!(matches!(cache.next(b"z", b"a", &mut buf), Err(ItemCacheError::NotFound)));
}

#[test]
fn next_reads_through_an_uncached_gap_before_the_last_bound() {
    init_tracing();

    let manifest = FakeManifest::new().with_item("m", "middle");
    let cache = with_manifest(manifest);
    // Nothing cached yet between "a" and "z": next() must read the
    // manifest and find "m".
    assert_eq!(lookup_next(&cache, b"a", b"z"), b"middle".to_vec());
}

#[test]
fn insert_batch_with_start_equal_end_installs_a_single_point_range() {
    init_tracing();

    let cache = fresh();
    let batch = Vec::new();
    cache.insert_batch(batch, k("m"), k("m")).unwrap();

    // "m" is now confirmed absent without any manifest read.
    let mut buf = [0u8; 8];
    assert!(matches!(cache.lookup(b"m", &mut buf), Err(ItemCacheError::NotFound)));
}

#[test]
fn delete_many_stops_before_any_tombstone_if_one_key_is_unreadable() {
    init_tracing();

    let manifest = FakeManifest::new().with_item("x", "X").mark_unreadable("y");
    let cache = with_manifest(manifest);

    let keys = vec![k("x"), k("y"), k("z")];
    assert!(cache.delete_many(&keys).is_err());

    // "x" was dirtied by phase one (it is readable) but never reaches
    // phase two: it stays a live item, not a tombstone.
    assert_eq!(lookup_vec(&cache, b"x", 8), b"X");
}

#[test]
fn delete_many_succeeds_when_every_key_is_readable() {
    init_tracing();

    let manifest = FakeManifest::new().with_item("x", "X").with_item("y", "Y");
    let cache = with_manifest(manifest);

    let keys = vec![k("x"), k("y")];
    cache.delete_many(&keys).unwrap();

    let mut buf = [0u8; 8];
    assert!(matches!(cache.lookup(b"x", &mut buf), Err(ItemCacheError::NotFound)));
    assert!(matches!(cache.lookup(b"y", &mut buf), Err(ItemCacheError::NotFound)));
    assert!(cache.has_dirty().unwrap());
}

#[test]
fn oversized_key_is_rejected_as_invalid() {
    init_tracing();

    let cache = fresh();
    let huge = vec![1u8; crate::key::MAX_KEY_SIZE + 1];
    assert!(matches!(cache.create(&huge, b"v"), Err(ItemCacheError::Invalid(_))));
}

#[test]
fn next_same_rejects_a_successor_of_different_key_length() {
    init_tracing();

    let cache = fresh();
    cache.create(b"aa", b"v1").unwrap();
    cache.create(b"b", b"v2").unwrap();

    let mut buf = [0u8; 8];
    // successor of "aa" within [aa, z] is "b", a different length.
    assert!(matches!(
        cache.next_same(b"aa", b"z", &mut buf),
        Err(ItemCacheError::Corruption(_))
    ));
}

#[test]
fn next_same_min_rejects_undersized_value_and_oversized_minimum() {
    init_tracing();

    let cache = fresh();
    cache.create(b"a", b"ab").unwrap();
    cache.create(b"b", b"cd").unwrap();

    let mut buf = [0u8; 8];
    assert!(matches!(
        cache.next_same_min(b"a", b"z", &mut buf, 4),
        Err(ItemCacheError::Corruption(_))
    ));

    let mut small_buf = [0u8; 2];
    assert!(matches!(
        cache.next_same_min(b"a", b"z", &mut small_buf, 4),
        Err(ItemCacheError::Invalid(_))
    ));
}
