//! # itemcache
//!
//! An in-memory cache of filesystem items sitting in front of an
//! on-disk, segment-based item manifest. Items are
//! `(key, value)` pairs; the cache tracks which keys are known live,
//! known deleted (tombstoned), or simply uncached, and which key
//! *ranges* have been fully read from the manifest so that repeated
//! misses over the same span never re-trigger a read.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`cache`] | The public lookup/create/update/delete/flush surface and its lock-drop-and-retry loop |
//! | [`item_index`] | Arena-backed AVL tree of cached items, augmented for in-order dirty enumeration |
//! | [`range_index`] | Non-overlapping coalescing index of key ranges known fully read from the manifest |
//! | [`accounting`] | Running totals over dirty items (count, key bytes, value bytes) |
//! | [`item`] | Item value/state primitives (`ItemState`, `ItemView`, `ItemFlags`) |
//! | [`key`] | Key primitives: size limit, the all-`0xFF` sentinel maximum key, validation |
//! | [`segment`] | External collaborator traits (`ManifestReader`, `SegmentWriter`) the cache reads through and flushes into |
//! | [`counters`] | Cache/range hit and miss counters |
//! | [`error`] | `ItemCacheError`, the crate's unified error type |
//!
//! ## Quick Start
//!
//! ```rust
//! use itemcache::cache::{ItemCache, ItemCacheConfig};
//! use itemcache::segment::testing::{FakeManifest, RecordingSegment};
//!
//! let manifest = FakeManifest::new().with_item("a", "1");
//! let cache = ItemCache::<FakeManifest, RecordingSegment>::new(manifest, ItemCacheConfig::default());
//!
//! cache.create(b"b", b"2").unwrap();
//!
//! let mut buf = [0u8; 8];
//! let n = cache.lookup(b"a", &mut buf).unwrap();
//! assert_eq!(&buf[..n], b"1");
//!
//! let mut seg = RecordingSegment::unbounded();
//! cache.dirty_seg(&mut seg).unwrap();
//! assert!(!cache.has_dirty().unwrap());
//! ```

pub mod accounting;
pub mod cache;
pub mod counters;
pub mod error;
pub mod item;
pub mod item_index;
pub mod key;
pub mod range_index;
pub mod segment;
