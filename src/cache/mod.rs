//! # ItemCache
//!
//! The public lookup/create/update/delete/flush surface. This is the
//! only module that knows about the cache-wide lock, the manifest
//! collaborator, and the lock-drop-and-retry loop; [`crate::item_index`]
//! and [`crate::range_index`] are pure in-memory structures with no
//! notion of either.
//!
//! ## Concurrency model
//!
//! A single `std::sync::Mutex<CacheInner>` covers [`crate::item_index::Tree`],
//! [`crate::range_index::RangeIndex`] and [`crate::accounting::Accounting`]
//! as one unit. The lock is taken and released by every public method
//! here; it is never held across a call into
//! [`crate::segment::ManifestReader::read_items`] — each retrying method
//! below follows the same shape: lock, inspect, unlock, optionally read,
//! loop. Lock poisoning is mapped to `ItemCacheError::Internal` rather
//! than panicking.
//!
//! ## Guarantees
//!
//! Every mutation and accounting update within one public call is atomic
//! relative to other callers. No operation here performs an allocation
//! while holding the lock other than the tree/range-index bookkeeping
//! itself; key and value buffers passed in are cloned into owned
//! storage before the lock is taken.

#[cfg(test)]
mod tests;

use std::sync::{Mutex, MutexGuard};

use tracing::{debug, error, trace, warn};

use crate::accounting::Accounting;
use crate::counters::Counters;
use crate::error::ItemCacheError;
use crate::item::{ItemFlags, ItemState, ItemView};
use crate::item_index::{InsertOutcome, Tree};
use crate::key::{self, DisplayKey, Key};
use crate::range_index::{Coverage, RangeIndex};
use crate::segment::{BatchSink, ManifestReader, SegmentWriter};

/// Configuration for an [`ItemCache`], threaded through the top-level
/// type's constructor even though today it carries a single knob.
#[derive(Debug, Clone)]
pub struct ItemCacheConfig {
    /// Upper bound on key length accepted by mutating/lookup operations.
    pub max_key_size: usize,
}

impl Default for ItemCacheConfig {
    fn default() -> Self {
        Self {
            max_key_size: key::MAX_KEY_SIZE,
        }
    }
}

struct CacheInner {
    items: Tree,
    ranges: RangeIndex,
    accounting: Accounting,
}

impl CacheInner {
    fn new() -> Self {
        Self {
            items: Tree::new(),
            ranges: RangeIndex::new(),
            accounting: Accounting::new(),
        }
    }
}

/// Outcome of a single no-read probe against the cache, shared by the
/// retry loops in `dirty`/`delete`, which follow the same gate-then-act
/// shape.
enum GateStep {
    Done,
    NotFound,
    NeedsRead { read_end: Key },
}

/// The item cache.
///
/// Generic over the manifest reader `M` and segment writer `S`
/// collaborators so the crate has no hard dependency on a concrete
/// manifest/segment implementation; production embedders supply their
/// own.
pub struct ItemCache<M: ManifestReader, S: SegmentWriter> {
    inner: Mutex<CacheInner>,
    manifest: M,
    counters: Counters,
    config: ItemCacheConfig,
    _segment: std::marker::PhantomData<fn(&mut S)>,
}

impl<M: ManifestReader, S: SegmentWriter> ItemCache<M, S> {
    /// Constructs an empty cache. No I/O happens here — this layer owns
    /// no durable state of its own; durability and crash recovery belong
    /// to the manifest.
    pub fn new(manifest: M, config: ItemCacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner::new()),
            manifest,
            counters: Counters::new(),
            config,
            _segment: std::marker::PhantomData,
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Access to the configured manifest collaborator, chiefly useful in
    /// tests that want to assert on how many reads a call triggered.
    pub fn manifest(&self) -> &M {
        &self.manifest
    }

    pub fn config(&self) -> &ItemCacheConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheInner>, ItemCacheError> {
        self.inner.lock().map_err(|_| {
            error!("item cache lock poisoned");
            ItemCacheError::Internal("cache lock poisoned".into())
        })
    }

    fn validate_key(&self, key: &[u8]) -> Result<(), ItemCacheError> {
        if key.is_empty() || key.len() > self.config.max_key_size {
            return Err(ItemCacheError::Invalid(format!(
                "key length {} outside 1..={}",
                key.len(),
                self.config.max_key_size
            )));
        }
        Ok(())
    }

    fn copy_into(value: &[u8], out: &mut [u8]) -> usize {
        let n = value.len().min(out.len());
        out[..n].copy_from_slice(&value[..n]);
        n
    }

    // --------------------------------------------------------------
    // Lookup
    // --------------------------------------------------------------

    /// Finds the live item at `key`, issuing a manifest read and
    /// retrying if its presence is unknown to the cache.
    fn find_or_read(&self, key: &[u8]) -> Result<Option<ItemView>, ItemCacheError> {
        loop {
            enum Step {
                Found(ItemView),
                KnownAbsent,
                NeedsRead { read_end: Key },
            }

            let step = {
                let guard = self.lock()?;
                if let Some(item) = guard.items.find(key) {
                    self.counters.record_item_hit();
                    Step::Found(item)
                } else {
                    self.counters.record_item_miss();
                    match guard.ranges.check(key) {
                        Coverage::Covered => {
                            self.counters.record_range_hit();
                            Step::KnownAbsent
                        }
                        Coverage::NotCovered { safe_end } => {
                            self.counters.record_range_miss();
                            Step::NeedsRead { read_end: safe_end }
                        }
                    }
                }
            };

            match step {
                Step::Found(item) => return Ok(Some(item)),
                Step::KnownAbsent => return Ok(None),
                Step::NeedsRead { read_end } => {
                    trace!(
                        "find_or_read(): manifest read {}..{}",
                        DisplayKey(key),
                        DisplayKey(&read_end)
                    );
                    self.manifest.read_items(key, &read_end, self)?;
                }
            }
        }
    }

    /// `lookup(key, out) → bytes_copied | NOT_FOUND`.
    /// Truncates at `out.len()`; the returned count reflects bytes
    /// actually copied.
    pub fn lookup(&self, key: &[u8], out: &mut [u8]) -> Result<usize, ItemCacheError> {
        self.validate_key(key)?;
        trace!("lookup() key={}", DisplayKey(key));
        match self.find_or_read(key)? {
            Some(item) => Ok(Self::copy_into(&item.value, out)),
            None => Err(ItemCacheError::NotFound),
        }
    }

    /// `lookup_exact` — as [`ItemCache::lookup`], but requires the copied
    /// value length to equal `size`; a mismatch is filesystem corruption,
    /// not a benign short read.
    pub fn lookup_exact(&self, key: &[u8], out: &mut [u8], size: usize) -> Result<usize, ItemCacheError> {
        if size > out.len() {
            return Err(ItemCacheError::BufferTooSmall {
                needed: size,
                available: out.len(),
            });
        }
        let n = self.lookup(key, out)?;
        if n != size {
            warn!("lookup_exact() size mismatch for {}: want {}, got {}", DisplayKey(key), size, n);
            return Err(ItemCacheError::Corruption(format!("expected {size} bytes, found {n}")));
        }
        Ok(n)
    }

    // --------------------------------------------------------------
    // Successor walk (`next`/`next_same`/`next_same_min`)
    // --------------------------------------------------------------

    /// Returns the least live item whose key is strictly greater than
    /// `key` and `<= last`, reading the manifest for any uncached gap
    /// encountered along the way and retrying.
    fn next_item(&self, key: &[u8], last: &[u8]) -> Result<Option<ItemView>, ItemCacheError> {
        let mut cursor = key.to_vec();
        loop {
            enum Step {
                Found(ItemView),
                FullyCovered,
                NeedsRead { start: Key, read_end: Key },
            }

            let step = {
                let guard = self.lock()?;
                let mut probe = cursor.clone();
                loop {
                    match guard.items.successor(&probe) {
                        Some((k, ItemState::Live(v))) if k.as_slice() <= last => {
                            self.counters.record_item_hit();
                            break Step::Found(ItemView { key: k, value: v });
                        }
                        Some((k, ItemState::Tombstone)) if k.as_slice() <= last => {
                            probe = k;
                            continue;
                        }
                        _ => {
                            self.counters.record_item_miss();
                            break match guard.ranges.check(&probe) {
                                Coverage::Covered => {
                                    self.counters.record_range_hit();
                                    let end = guard
                                        .ranges
                                        .covering_end(&probe)
                                        .expect("Coverage::Covered implies covering_end is Some");
                                    if end.as_slice() >= last {
                                        Step::FullyCovered
                                    } else {
                                        Step::NeedsRead {
                                            start: end,
                                            read_end: last.to_vec(),
                                        }
                                    }
                                }
                                Coverage::NotCovered { safe_end } => {
                                    self.counters.record_range_miss();
                                    let read_end = if safe_end.as_slice() < last { safe_end } else { last.to_vec() };
                                    Step::NeedsRead {
                                        start: probe.clone(),
                                        read_end,
                                    }
                                }
                            };
                        }
                    }
                }
            };

            match step {
                Step::Found(item) => return Ok(Some(item)),
                Step::FullyCovered => return Ok(None),
                Step::NeedsRead { start, read_end } => {
                    trace!(
                        "next(): manifest read {}..{} (gap after {})",
                        DisplayKey(&start),
                        DisplayKey(&read_end),
                        DisplayKey(&cursor)
                    );
                    self.manifest.read_items(&start, &read_end, self)?;
                    cursor = start;
                }
            }
        }
    }

    /// `next(key, last, out) → bytes_copied | NOT_FOUND`.
    pub fn next(&self, key: &[u8], last: &[u8], out: &mut [u8]) -> Result<usize, ItemCacheError> {
        self.validate_key(key)?;
        trace!("next() key={} last={}", DisplayKey(key), DisplayKey(last));
        if key > last {
            // No manifest read needed: an empty search window is known
            // empty without consulting cache state at all.
            return Err(ItemCacheError::NotFound);
        }
        match self.next_item(key, last)? {
            Some(item) => Ok(Self::copy_into(&item.value, out)),
            None => Err(ItemCacheError::NotFound),
        }
    }

    /// `next_same` — as [`ItemCache::next`], but requires the returned
    /// key to have the same length as the query key; used by callers
    /// that search fixed-width key families.
    pub fn next_same(&self, key: &[u8], last: &[u8], out: &mut [u8]) -> Result<usize, ItemCacheError> {
        self.validate_key(key)?;
        if key > last {
            return Err(ItemCacheError::NotFound);
        }
        let item = self.next_item(key, last)?.ok_or(ItemCacheError::NotFound)?;
        if item.key.len() != key.len() {
            warn!(
                "next_same() key length changed: query {} found {}",
                key.len(),
                item.key.len()
            );
            return Err(ItemCacheError::Corruption(format!(
                "successor key length {} != query key length {}",
                item.key.len(),
                key.len()
            )));
        }
        Ok(Self::copy_into(&item.value, out))
    }

    /// `next_same_min` — as [`ItemCache::next_same`], additionally
    /// requiring the value to be at least `min_val_len` bytes long.
    pub fn next_same_min(
        &self,
        key: &[u8],
        last: &[u8],
        out: &mut [u8],
        min_val_len: usize,
    ) -> Result<usize, ItemCacheError> {
        if min_val_len > out.len() {
            return Err(ItemCacheError::Invalid(format!(
                "min_val_len {} exceeds buffer capacity {}",
                min_val_len,
                out.len()
            )));
        }
        self.validate_key(key)?;
        if key > last {
            return Err(ItemCacheError::NotFound);
        }
        let item = self.next_item(key, last)?.ok_or(ItemCacheError::NotFound)?;
        if item.key.len() != key.len() {
            return Err(ItemCacheError::Corruption(format!(
                "successor key length {} != query key length {}",
                item.key.len(),
                key.len()
            )));
        }
        if item.value.len() < min_val_len {
            return Err(ItemCacheError::Corruption(format!(
                "value length {} below minimum {}",
                item.value.len(),
                min_val_len
            )));
        }
        Ok(Self::copy_into(&item.value, out))
    }

    // --------------------------------------------------------------
    // Mutations
    // --------------------------------------------------------------

    /// `create(key, val) → Ok | Exists`. Never reads the manifest: a
    /// fresh live item may mask a pre-existing on-storage item with the
    /// same key, and the caller is responsible for that invariant.
    pub fn create(&self, key: &[u8], value: &[u8]) -> Result<(), ItemCacheError> {
        self.validate_key(key)?;
        trace!("create() key={}", DisplayKey(key));
        let key_owned = key.to_vec();
        let value_owned = value.to_vec();
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        match inner.items.create(&mut inner.accounting, key_owned, value_owned) {
            InsertOutcome::Inserted => Ok(()),
            InsertOutcome::Exists => Err(ItemCacheError::AlreadyExists),
        }
    }

    /// `update(key, val) → Ok | NOT_FOUND`. The new value is cloned
    /// before the lock is taken; under lock the item is cleared-dirty
    /// then re-marked around the swap so `dirty_val_bytes` tracks the
    /// new length exactly.
    pub fn update(&self, key: &[u8], value: &[u8]) -> Result<(), ItemCacheError> {
        self.validate_key(key)?;
        trace!("update() key={}", DisplayKey(key));
        let value_owned = value.to_vec();
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        if inner.items.update(&mut inner.accounting, key, value_owned) {
            Ok(())
        } else {
            Err(ItemCacheError::NotFound)
        }
    }

    /// `dirty(key) → Ok | NOT_FOUND`. Forces a manifest read if the key's
    /// presence is unknown.
    pub fn dirty(&self, key: &[u8]) -> Result<(), ItemCacheError> {
        self.validate_key(key)?;
        trace!("dirty() key={}", DisplayKey(key));
        loop {
            let step = {
                let mut guard = self.lock()?;
                let inner = &mut *guard;
                if inner.items.dirty(&mut inner.accounting, key) {
                    self.counters.record_item_hit();
                    GateStep::Done
                } else if inner.items.raw(key).is_some() {
                    // A tombstone occupies the key: confirmed absent,
                    // no manifest read needed.
                    self.counters.record_item_hit();
                    GateStep::NotFound
                } else {
                    self.counters.record_item_miss();
                    match inner.ranges.check(key) {
                        Coverage::Covered => {
                            self.counters.record_range_hit();
                            GateStep::NotFound
                        }
                        Coverage::NotCovered { safe_end } => {
                            self.counters.record_range_miss();
                            GateStep::NeedsRead { read_end: safe_end }
                        }
                    }
                }
            };
            match step {
                GateStep::Done => return Ok(()),
                GateStep::NotFound => return Err(ItemCacheError::NotFound),
                GateStep::NeedsRead { read_end } => {
                    self.manifest.read_items(key, &read_end, self)?;
                }
            }
        }
    }

    /// `delete(key) → Ok | NOT_FOUND`. Reads the manifest if the key's
    /// presence is unknown, then converts the live item to a dirty
    /// tombstone.
    pub fn delete(&self, key: &[u8]) -> Result<(), ItemCacheError> {
        self.validate_key(key)?;
        trace!("delete() key={}", DisplayKey(key));
        loop {
            let step = {
                let mut guard = self.lock()?;
                let inner = &mut *guard;
                if inner.items.delete(&mut inner.accounting, key) {
                    self.counters.record_item_hit();
                    GateStep::Done
                } else if inner.items.raw(key).is_some() {
                    self.counters.record_item_hit();
                    GateStep::NotFound
                } else {
                    self.counters.record_item_miss();
                    match inner.ranges.check(key) {
                        Coverage::Covered => {
                            self.counters.record_range_hit();
                            GateStep::NotFound
                        }
                        Coverage::NotCovered { safe_end } => {
                            self.counters.record_range_miss();
                            GateStep::NeedsRead { read_end: safe_end }
                        }
                    }
                }
            };
            match step {
                GateStep::Done => return Ok(()),
                GateStep::NotFound => return Err(ItemCacheError::NotFound),
                GateStep::NeedsRead { read_end } => {
                    self.manifest.read_items(key, &read_end, self)?;
                }
            }
        }
    }

    /// `delete_dirty(key)`. Precondition: the caller previously dirtied
    /// `key` via [`ItemCache::dirty`], so the item is known present and
    /// live; this cannot fail except on lock poisoning.
    pub fn delete_dirty(&self, key: &[u8]) -> Result<(), ItemCacheError> {
        trace!("delete_dirty() key={}", DisplayKey(key));
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        inner.items.delete_dirty(&mut inner.accounting, key);
        Ok(())
    }

    /// `delete_many(keys)`. Two-phase: dirties every key first (any may
    /// read and any may fail), then converts each to a tombstone. No
    /// tombstone is created unless every key was successfully dirtied.
    pub fn delete_many(&self, keys: &[Key]) -> Result<(), ItemCacheError> {
        for key in keys {
            self.dirty(key)?;
        }
        for key in keys {
            self.delete_dirty(key)?;
        }
        Ok(())
    }

    // --------------------------------------------------------------
    // Batch intake
    // --------------------------------------------------------------

    /// `add_batch(list, key, val)`. Appends to the tail of a caller-owned
    /// scratch list; callers must supply keys in ascending order.
    pub fn add_batch(&self, list: &mut Vec<(Key, Vec<u8>)>, key: Key, value: Vec<u8>) {
        list.push((key, value));
    }

    /// `insert_batch(list, start, end)`. Installs the covering range
    /// (coalescing with any overlap) then inserts each item, dropping
    /// duplicates — a key already live or tombstoned in the cache is
    /// considered at least as fresh as the read. The list is always
    /// consumed (and thus freed) on return.
    pub fn insert_batch(&self, list: Vec<(Key, Vec<u8>)>, start: Key, end: Key) -> Result<(), ItemCacheError> {
        if start > end {
            return Err(ItemCacheError::Invalid("insert_batch: start > end".into()));
        }
        trace!(
            "insert_batch() range={}..{} items={}",
            DisplayKey(&start),
            DisplayKey(&end),
            list.len()
        );
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        inner.ranges.insert(start, end);

        let mut installed = 0usize;
        for (key, value) in list {
            if inner.items.insert_clean(key, value) {
                installed += 1;
            }
        }
        debug!("insert_batch() installed {installed} new item(s)");
        Ok(())
    }

    // --------------------------------------------------------------
    // Flush path
    // --------------------------------------------------------------

    /// `has_dirty() → bool`. Constant-time accounting check.
    pub fn has_dirty(&self) -> Result<bool, ItemCacheError> {
        Ok(self.lock()?.accounting.has_dirty())
    }

    /// `dirty_fits_single(n, kb, vb) → bool`. Asks `seg` whether current
    /// dirty totals plus these extra counts would fit in a single
    /// segment.
    pub fn dirty_fits_single(
        &self,
        seg: &S,
        extra_items: usize,
        extra_key_bytes: usize,
        extra_val_bytes: usize,
    ) -> Result<bool, ItemCacheError> {
        let a = self.lock()?.accounting;
        Ok(seg.seg_fits_single(
            a.nr_dirty_items + extra_items,
            a.dirty_key_bytes + extra_key_bytes,
            a.dirty_val_bytes + extra_val_bytes,
        ))
    }

    /// `dirty_seg(seg)`. Walks dirty items in key order using the
    /// augmentation to size how many fit, then re-walks to emit them:
    /// the first call is `seg_first_item`, the rest `seg_append_item`.
    /// Each emitted item is cleared of its dirty bit; tombstones are
    /// additionally erased from the index. Returns the number of items
    /// flushed.
    pub fn dirty_seg(&self, seg: &mut S) -> Result<usize, ItemCacheError> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;

        let mut fit_count = 0usize;
        let mut key_bytes = 0usize;
        let mut val_bytes = 0usize;
        let mut cursor = inner.items.first_dirty();
        while let Some(key) = cursor {
            let (k, state) = inner.items.raw(&key).expect("first_dirty/next_dirty key must be present");
            let kb = k.len();
            let vb = state.value_len();
            if !seg.seg_fits_single(fit_count + 1, key_bytes + kb, val_bytes + vb) {
                break;
            }
            fit_count += 1;
            key_bytes += kb;
            val_bytes += vb;
            cursor = inner.items.next_dirty(&key);
        }

        if fit_count == 0 {
            return Ok(0);
        }

        let mut cursor = inner.items.first_dirty();
        for i in 0..fit_count {
            let key = cursor.take().expect("fit_count dirty items must exist");
            let (k, state) = inner.items.raw(&key).expect("dirty key must be present");
            let flags = if state.is_tombstone() { ItemFlags::DELETION } else { ItemFlags::NONE };
            let value: &[u8] = match &state {
                ItemState::Live(v) => v.as_slice(),
                ItemState::Tombstone => &[],
            };

            if i == 0 {
                seg.seg_first_item(&k, value, flags, fit_count, key_bytes);
            } else {
                seg.seg_append_item(&k, value, flags);
            }

            // Capture the next dirty key before clearing this one's
            // dirty bit: clearing (or erasing) removes it from the
            // dirty-order traversal.
            let next_key = inner.items.next_dirty(&k);

            if state.is_tombstone() {
                inner.items.erase_tombstone(&mut inner.accounting, &k);
            } else {
                inner.items.mark_clean(&mut inner.accounting, &k);
            }

            cursor = next_key;
        }

        debug!("dirty_seg() flushed {fit_count} item(s), {key_bytes} key bytes, {val_bytes} value bytes");
        Ok(fit_count)
    }

    /// Number of disjoint cached ranges currently tracked, for tests
    /// asserting on [`crate::range_index::RangeIndex`] coalescing from
    /// the cache's public surface.
    #[cfg(test)]
    pub(crate) fn range_count(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").ranges.len()
    }

    /// Snapshot of the dirty accounting totals, for tests that cross-check
    /// exact byte counts after a race between writers.
    #[cfg(test)]
    pub(crate) fn accounting_snapshot(&self) -> Accounting {
        self.inner.lock().expect("cache lock poisoned").accounting
    }

    /// Runs [`crate::item_index::Tree::audit`] under lock, a structural
    /// self-check for use after a round of randomized concurrent
    /// mutations.
    #[cfg(test)]
    pub(crate) fn audit_items(&self) -> bool {
        self.inner.lock().expect("cache lock poisoned").items.audit()
    }
}

impl<M: ManifestReader, S: SegmentWriter> BatchSink for ItemCache<M, S> {
    fn add_batch(&self, list: &mut Vec<(Vec<u8>, Vec<u8>)>, key: Vec<u8>, value: Vec<u8>) {
        ItemCache::add_batch(self, list, key, value);
    }

    fn insert_batch(&self, list: Vec<(Vec<u8>, Vec<u8>)>, start: Vec<u8>, end: Vec<u8>) -> Result<(), ItemCacheError> {
        ItemCache::insert_batch(self, list, start, end)
    }
}
