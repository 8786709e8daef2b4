//! # RangeIndex
//!
//! An ordered set of non-overlapping, closed key ranges marking the
//! portions of the key space that are fully represented in the item
//! cache. Unlike [`crate::item_index`], ranges carry no augmentation, so
//! a plain [`BTreeMap`] keyed by range start is enough — there is no
//! rotation/rebalancing concern here at all.


use std::collections::BTreeMap;
use std::ops::Bound;

use crate::key::{self, Key};

/// Result of checking whether a key is known-covered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coverage {
    /// The key falls within a cached range; no manifest read is needed.
    Covered,
    /// The key is not known to be covered. `safe_end` is the largest key
    /// a fill-read starting at the queried key may request without
    /// re-entering cache bookkeeping incorrectly — it may coincide with
    /// the start of the next cached range (a harmless one-key overlap
    /// that [`RangeIndex::insert`] coalesces away), or the sentinel
    /// [`key::max_key`] if no later range exists.
    NotCovered { safe_end: Key },
}

/// The set of cached key ranges.
#[derive(Debug, Default)]
pub struct RangeIndex {
    ranges: BTreeMap<Key, Key>,
}

impl RangeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Reports whether `key` is covered by a cached range, and if not,
    /// how far a fill-read may safely extend.
    pub fn check(&self, key: &[u8]) -> Coverage {
        if let Some((_, end)) = self.ranges.range(..=key.to_vec()).next_back() {
            if end.as_slice() >= key {
                return Coverage::Covered;
            }
        }
        match self
            .ranges
            .range((Bound::Excluded(key.to_vec()), Bound::Unbounded))
            .next()
        {
            Some((start, _)) => Coverage::NotCovered { safe_end: start.clone() },
            None => Coverage::NotCovered { safe_end: key::max_key() },
        }
    }

    /// Returns the end of the range covering `key`, if any.
    ///
    /// Used by `cache::ItemCache::next` to learn how far a cached range
    /// extends past the query key without re-deriving it from
    /// [`RangeIndex::check`], which only reports covered/not-covered for
    /// [`crate::cache`]'s simpler callers.
    pub fn covering_end(&self, key: &[u8]) -> Option<Key> {
        self.ranges.range(..=key.to_vec()).next_back().and_then(|(_, end)| {
            if end.as_slice() >= key { Some(end.clone()) } else { None }
        })
    }

    /// Finds a single range currently in the set that overlaps or
    /// touches `[start, end]`, if any. Only ever needs to look at the
    /// range starting at-or-before `start` and the range starting
    /// immediately after it — see module docs on why the restart loop
    /// in [`RangeIndex::insert`] still finds every overlap this way.
    fn find_overlap(&self, start: &[u8], end: &[u8]) -> Option<(Key, Key)> {
        if let Some((s, e)) = self.ranges.range(..=start.to_vec()).next_back() {
            if key::compare_ranges(start, end, s, e).is_eq() {
                return Some((s.clone(), e.clone()));
            }
        }
        if let Some((s, e)) = self
            .ranges
            .range((Bound::Excluded(start.to_vec()), Bound::Unbounded))
            .next()
        {
            if key::compare_ranges(start, end, s, e).is_eq() {
                return Some((s.clone(), e.clone()));
            }
        }
        None
    }

    /// Marks `[start, end]` as fully cached, merging with any range it
    /// overlaps or touches until the set is non-overlapping again.
    pub fn insert(&mut self, mut start: Key, mut end: Key) {
        debug_assert!(start <= end, "range start must not exceed end");
        loop {
            match self.find_overlap(&start, &end) {
                Some((os, oe)) => {
                    self.ranges.remove(&os);
                    if os < start {
                        start = os;
                    }
                    if oe > end {
                        end = oe;
                    }
                }
                None => {
                    self.ranges.insert(start, end);
                    return;
                }
            }
        }
    }

    /// Full snapshot of the cached ranges in order, for tests.
    pub fn ranges_in_order(&self) -> Vec<(Key, Key)> {
        self.ranges.iter().map(|(s, e)| (s.clone(), e.clone())).collect()
    }
}
