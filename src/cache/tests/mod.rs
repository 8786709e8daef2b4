mod tests_edge_cases;

use crate::cache::{ItemCache, ItemCacheConfig};
use crate::segment::testing::{FakeManifest, RecordingSegment};

/// A cache wired to a [`FakeManifest`] and a size-unbounded
/// [`RecordingSegment`], the combination most tests need.
pub(crate) fn fresh() -> ItemCache<FakeManifest, RecordingSegment> {
    ItemCache::new(FakeManifest::new(), ItemCacheConfig::default())
}

pub(crate) fn with_manifest(manifest: FakeManifest) -> ItemCache<FakeManifest, RecordingSegment> {
    ItemCache::new(manifest, ItemCacheConfig::default())
}

pub(crate) fn k(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

/// Reads `buf_len` bytes back via `lookup`, returning the value as a
/// `Vec<u8>` trimmed to the bytes actually copied.
pub(crate) fn lookup_vec(cache: &ItemCache<FakeManifest, RecordingSegment>, key: &[u8], buf_len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; buf_len];
    let n = cache.lookup(key, &mut buf).expect("lookup");
    buf.truncate(n);
    buf
}

/// Installs a `tracing` subscriber for the duration of the test process.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt::Subscriber::builder()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}
