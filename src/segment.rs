//! External collaborator interfaces.
//!
//! The manifest/segment reader and segment writer live outside this
//! crate in a real deployment (they own on-disk format, compaction,
//! durability — all out of scope here). They are expressed here as
//! traits, with one in-memory reference implementation per trait, so the
//! crate compiles and tests stand alone.

use crate::error::{ItemCacheError, ManifestReadError};
use crate::item::ItemFlags;

/// The narrow surface a [`ManifestReader`] uses to hand back what it
/// found, implemented by [`crate::cache::ItemCache`] itself.
///
/// `read_items` needs to call back into the cache's own
/// `add_batch`/`insert_batch` to populate the items it found and install
/// the covering range atomically, but a `ManifestReader` impl cannot
/// name `ItemCache<Self, S>` without a cyclic type parameter over
/// itself. Passing a `&dyn BatchSink` into `read_items` breaks the
/// cycle — the collaborator only needs these two operations, not the
/// whole cache.
pub trait BatchSink {
    fn add_batch(&self, list: &mut Vec<(Vec<u8>, Vec<u8>)>, key: Vec<u8>, value: Vec<u8>);

    fn insert_batch(&self, list: Vec<(Vec<u8>, Vec<u8>)>, start: Vec<u8>, end: Vec<u8>) -> Result<(), ItemCacheError>;
}

/// Populates the cache with a batch of clean items covering a closed key
/// range, and installs the covering range — both atomically, under the
/// cache's own lock, via the supplied [`BatchSink`].
///
/// The cache's retry loop re-verifies state after reacquiring its lock,
/// so concurrent callers populating overlapping ranges are safe.
pub trait ManifestReader {
    fn read_items(&self, start: &[u8], end: &[u8], sink: &dyn BatchSink) -> Result<(), ManifestReadError>;
}

/// Sink for a flushed segment.
pub trait SegmentWriter {
    /// Pure predicate: would a segment with these totals fit in a single
    /// segment? Called both during flush planning and via
    /// `ItemCache::dirty_fits_single`.
    fn seg_fits_single(&self, n_items: usize, key_bytes: usize, val_bytes: usize) -> bool;

    /// Begins a new segment with its first item. Must be followed by
    /// exactly `n_items - 1` calls to [`SegmentWriter::seg_append_item`].
    fn seg_first_item(&mut self, key: &[u8], val: &[u8], flags: ItemFlags, n_items: usize, key_bytes: usize);

    /// Emits the next item of the segment started by `seg_first_item`.
    fn seg_append_item(&mut self, key: &[u8], val: &[u8], flags: ItemFlags);
}

/// Reference, in-memory implementations of the two collaborator traits,
/// used by this crate's own tests and doctests so they do not depend on
/// a real manifest/segment store. Not intended for production use.
#[cfg(any(test, doctest, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;

    /// A manifest stand-in backed by an in-memory sorted map.
    ///
    /// `read_items` walks its store over `[start, end]`, builds a batch
    /// via the supplied [`BatchSink`], and installs it, the same
    /// contract a real manifest reader walking on-disk segments would
    /// follow.
    pub struct FakeManifest {
        store: BTreeMap<Vec<u8>, Vec<u8>>,
        /// Keys that should simulate a collaborator read failure.
        unreadable: BTreeSet<Vec<u8>>,
        pub reads: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
    }

    impl FakeManifest {
        pub fn new() -> Self {
            Self {
                store: BTreeMap::new(),
                unreadable: BTreeSet::new(),
                reads: Mutex::new(Vec::new()),
            }
        }

        pub fn with_item(mut self, key: impl Into<Vec<u8>>, val: impl Into<Vec<u8>>) -> Self {
            self.store.insert(key.into(), val.into());
            self
        }

        pub fn mark_unreadable(mut self, key: impl Into<Vec<u8>>) -> Self {
            self.unreadable.insert(key.into());
            self
        }

        pub fn reads_count(&self) -> usize {
            self.reads.lock().expect("reads mutex poisoned").len()
        }
    }

    impl Default for FakeManifest {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ManifestReader for FakeManifest {
        fn read_items(&self, start: &[u8], end: &[u8], sink: &dyn BatchSink) -> Result<(), ManifestReadError> {
            self.reads
                .lock()
                .expect("reads mutex poisoned")
                .push((start.to_vec(), end.to_vec()));

            let mut batch = Vec::new();
            for (k, v) in self.store.range(start.to_vec()..=end.to_vec()) {
                if self.unreadable.contains(k) {
                    return Err(ManifestReadError(format!("simulated read failure for key {k:?}")));
                }
                sink.add_batch(&mut batch, k.clone(), v.clone());
            }
            sink.insert_batch(batch, start.to_vec(), end.to_vec())
                .map_err(|e| ManifestReadError(e.to_string()))
        }
    }

    /// A segment writer stand-in that records emitted items in order,
    /// for asserting flush output in tests.
    #[derive(Default)]
    pub struct RecordingSegment {
        pub items: Vec<(Vec<u8>, Vec<u8>, ItemFlags)>,
        pub capacity_items: usize,
        pub capacity_bytes: usize,
    }

    impl RecordingSegment {
        pub fn unbounded() -> Self {
            Self {
                items: Vec::new(),
                capacity_items: usize::MAX,
                capacity_bytes: usize::MAX,
            }
        }
    }

    impl SegmentWriter for RecordingSegment {
        fn seg_fits_single(&self, n_items: usize, key_bytes: usize, val_bytes: usize) -> bool {
            n_items <= self.capacity_items && key_bytes + val_bytes <= self.capacity_bytes
        }

        fn seg_first_item(&mut self, key: &[u8], val: &[u8], flags: ItemFlags, _n_items: usize, _key_bytes: usize) {
            self.items.push((key.to_vec(), val.to_vec(), flags));
        }

        fn seg_append_item(&mut self, key: &[u8], val: &[u8], flags: ItemFlags) {
            self.items.push((key.to_vec(), val.to_vec(), flags));
        }
    }
}
