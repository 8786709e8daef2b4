//! Micro-benchmarks for the item cache's hot paths.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro --features testing       # run all micro-benchmarks
//! cargo bench --bench micro --features testing -- lookup   # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use itemcache::cache::{ItemCache, ItemCacheConfig};
use itemcache::segment::testing::{FakeManifest, RecordingSegment};
use std::sync::Arc;

type Cache = ItemCache<FakeManifest, RecordingSegment>;

/// Default value payload for benchmarks (128 bytes).
const VALUE_128B: &[u8; 128] = &[0xAB; 128];

/// Larger value payload (1 KiB).
const VALUE_1K: &[u8; 1024] = &[0xCD; 1024];

fn make_key(i: u64) -> Vec<u8> {
    format!("key-{i:012}").into_bytes()
}

/// A fresh, empty cache backed by an empty manifest — every mutation
/// happens purely in memory, never touching the manifest.
fn empty_cache() -> Cache {
    ItemCache::new(FakeManifest::new(), ItemCacheConfig::default())
}

/// A cache pre-populated with `count` sequential live keys.
fn populated_cache(count: u64, value: &[u8]) -> Cache {
    let cache = empty_cache();
    for i in 0..count {
        cache.create(&make_key(i), value).unwrap();
    }
    cache
}

// ================================================================================================
// Create / update benchmarks
// ================================================================================================

/// Benchmark group for `create`/`update`.
///
/// # Sub-benchmarks
///
/// ## `create/128B` and `create/1K`
///
/// **Scenario:** Inserts a fresh sequential key into an empty cache.
///
/// **What it measures:** The cost of an AVL insert plus accounting
/// update under the single cache lock, with no manifest I/O at all
/// (`create` never reads the manifest).
///
/// ## `update_existing`
///
/// **Scenario:** Repeatedly overwrites the same existing key.
///
/// **What it measures:** The clear-dirty/re-mark-dirty round trip in
/// [`ItemCache::update`] that keeps `dirty_val_bytes` exact across
/// value-length changes.
fn bench_create_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_update");

    for &(label, value) in &[("128B", VALUE_128B.as_slice()), ("1K", VALUE_1K.as_slice())] {
        group.bench_function(BenchmarkId::new("create", label), |b| {
            b.iter_batched(
                empty_cache,
                |cache| {
                    let mut seq = 0u64;
                    let key = make_key(seq);
                    cache.create(black_box(&key), black_box(value)).unwrap();
                    seq += 1;
                    black_box(seq);
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.bench_function("update_existing", |b| {
        let cache = empty_cache();
        cache.create(b"k", VALUE_128B).unwrap();
        b.iter(|| {
            cache.update(black_box(b"k"), black_box(VALUE_128B.as_slice())).unwrap();
        });
    });

    group.finish();
}

// ================================================================================================
// Lookup benchmarks
// ================================================================================================

/// Benchmark group for `lookup`.
///
/// # Sub-benchmarks
///
/// ## `hit`
///
/// **Scenario:** Looks up random keys that live in a 10,000-item cache.
///
/// **What it measures:** AVL search latency for the common case: no
/// manifest read needed.
///
/// ## `miss_covered`
///
/// **Scenario:** Looks up keys confirmed absent by a cached range
/// spanning the whole key space.
///
/// **What it measures:** The cost of a negative lookup once the range
/// index has already ruled the key out, i.e. without a manifest read.
fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");

    let n = 10_000u64;
    let cache = populated_cache(n, VALUE_128B);

    group.bench_function("hit", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = make_key(i % n);
            let mut buf = [0u8; 128];
            let _ = black_box(cache.lookup(black_box(&key), &mut buf).unwrap());
            i += 1;
        });
    });

    let miss_cache = empty_cache();
    miss_cache.insert_batch(Vec::new(), make_key(0), make_key(n)).unwrap();
    group.bench_function("miss_covered", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = make_key(n + i);
            let mut buf = [0u8; 128];
            let _ = black_box(miss_cache.lookup(black_box(&key), &mut buf));
            i += 1;
        });
    });

    group.finish();
}

// ================================================================================================
// Delete benchmarks
// ================================================================================================

/// Benchmark group for `delete`.
///
/// # Sub-benchmarks
///
/// ## `point`
///
/// **Scenario:** Converts a pre-existing live item to a tombstone.
///
/// **What it measures:** The cost of the dirty-gate check plus the AVL
/// state transition `Live -> Tombstone`, including accounting deltas.
fn bench_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete");

    group.bench_function("point", |b| {
        b.iter_batched(
            || {
                let cache = empty_cache();
                cache.create(b"k", VALUE_128B).unwrap();
                cache
            },
            |cache| {
                cache.delete(black_box(b"k")).unwrap();
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

// ================================================================================================
// Flush benchmarks
// ================================================================================================

/// Benchmark group for `dirty_seg`.
///
/// # Sub-benchmarks
///
/// ## `dirty_seg/{100,1000,10000}`
///
/// **Scenario:** Dirties N sequential keys, then flushes all of them
/// into an unbounded [`RecordingSegment`] in one call.
///
/// **What it measures:** The two-pass dirty-order walk (size, then
/// emit) across the full dirty set, dominated by AVL in-order
/// successor traversal via the dirty-summary augmentation.
fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush");
    group.sample_size(20);

    for &count in &[100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_function(BenchmarkId::new("dirty_seg", count), |b| {
            b.iter_batched(
                || populated_cache(count, VALUE_128B),
                |cache| {
                    let mut seg = RecordingSegment::unbounded();
                    let flushed = cache.dirty_seg(black_box(&mut seg)).unwrap();
                    black_box(flushed);
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

// ================================================================================================
// Successor-walk benchmarks
// ================================================================================================

/// Benchmark group for `next`.
///
/// # Sub-benchmarks
///
/// ## `next_hit`
///
/// **Scenario:** Walks forward one key at a time through a 10,000-item
/// cache via repeated `next` calls.
///
/// **What it measures:** AVL successor-walk cost, the same traversal
/// used by range scans over cached items.
fn bench_next(c: &mut Criterion) {
    let mut group = c.benchmark_group("next");

    let n = 10_000u64;
    let cache = populated_cache(n, VALUE_128B);
    let last = make_key(n);

    group.bench_function("next_hit", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = make_key(i % (n - 1));
            let mut buf = [0u8; 128];
            let _ = black_box(cache.next(black_box(&key), black_box(&last), &mut buf).unwrap());
            i += 1;
        });
    });

    group.finish();
}

// ================================================================================================
// Concurrent access benchmarks
// ================================================================================================

/// Benchmark group for concurrent (multi-threaded) cache access.
///
/// `ItemCache` is `Send + Sync` via its single `Mutex` and is designed
/// for shared access through `Arc<ItemCache<_, _>>`.
///
/// # Sub-benchmarks
///
/// ## `readers/{1,2,4}`
///
/// **Scenario:** N threads perform random point lookups against a
/// 10,000-item cache. Each thread executes 1,000 lookups.
///
/// **What it measures:** Lookup throughput scaling under lock
/// contention — every lookup takes the same `Mutex`, unlike an
/// LSM-tree's lock-free immutable-SSTable reads, so this benchmark is
/// expected to show contention where a finer-grained design would not.
fn bench_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent");
    group.sample_size(10);

    let n = 10_000u64;
    let reads_per_thread = 1_000u64;

    for &num_readers in &[1u32, 2, 4] {
        group.bench_function(BenchmarkId::new("readers", num_readers), |b| {
            b.iter_batched(
                || Arc::new(populated_cache(n, VALUE_128B)),
                |cache| {
                    let mut handles = Vec::new();
                    for t in 0..num_readers {
                        let cache = Arc::clone(&cache);
                        handles.push(std::thread::spawn(move || {
                            let mut buf = [0u8; 128];
                            for i in 0..reads_per_thread {
                                let key = make_key((i + t as u64 * 1000) % n);
                                let _ = black_box(cache.lookup(&key, &mut buf));
                            }
                        }));
                    }
                    for h in handles {
                        h.join().unwrap();
                    }
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

// ================================================================================================
// Value-size scaling
// ================================================================================================

/// Benchmark group for value-size scaling analysis.
///
/// # Sub-benchmarks
///
/// ## `create/{64B,256B,1K,4K}`
///
/// **Scenario:** Creates a single fresh key with a value of the
/// specified size.
///
/// **What it measures:** How `create` latency and throughput scale
/// with value size, isolating the cost of cloning and storing larger
/// payloads in the item index.
fn bench_value_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_size");

    let sizes: &[(&str, usize)] = &[("64B", 64), ("256B", 256), ("1K", 1024), ("4K", 4096)];

    for &(label, size) in sizes {
        let value = vec![0xEF_u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(BenchmarkId::new("create", label), |b| {
            b.iter_batched(
                empty_cache,
                |cache| {
                    cache.create(black_box(b"k"), black_box(&value)).unwrap();
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

// ================================================================================================
// Group registration
// ================================================================================================

criterion_group!(
    benches,
    bench_create_update,
    bench_lookup,
    bench_delete,
    bench_flush,
    bench_next,
    bench_concurrent,
    bench_value_sizes,
);

criterion_main!(benches);
