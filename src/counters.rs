//! Opaque statistical hooks.
//!
//! A handful of `AtomicU64`s, incremented inline under the cache lock,
//! with a `trace!` alongside each increment.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Hit/miss counters for [`crate::item_index::ItemIndex`] and
/// [`crate::range_index::RangeIndex`] lookups.
///
/// Cheap enough to update inline under the cache lock; read with
/// `Ordering::Relaxed` since these are diagnostic, not synchronizing.
#[derive(Debug, Default)]
pub struct Counters {
    item_hits: AtomicU64,
    item_misses: AtomicU64,
    range_hits: AtomicU64,
    range_misses: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_item_hit(&self) {
        self.item_hits.fetch_add(1, Ordering::Relaxed);
        trace!("item index hit");
    }

    pub fn record_item_miss(&self) {
        self.item_misses.fetch_add(1, Ordering::Relaxed);
        trace!("item index miss");
    }

    pub fn record_range_hit(&self) {
        self.range_hits.fetch_add(1, Ordering::Relaxed);
        trace!("range index hit");
    }

    pub fn record_range_miss(&self) {
        self.range_misses.fetch_add(1, Ordering::Relaxed);
        trace!("range index miss");
    }

    pub fn item_hits(&self) -> u64 {
        self.item_hits.load(Ordering::Relaxed)
    }

    pub fn item_misses(&self) -> u64 {
        self.item_misses.load(Ordering::Relaxed)
    }

    pub fn range_hits(&self) -> u64 {
        self.range_hits.load(Ordering::Relaxed)
    }

    pub fn range_misses(&self) -> u64 {
        self.range_misses.load(Ordering::Relaxed)
    }
}
