//! Error types for the item cache.
//!
//! One flat enum at the public seam, `#[from]` conversions for
//! collaborator errors, `Internal` as the catch-all for lock poisoning
//! and other invariant breaks that should never happen but must not
//! panic in a library.

use thiserror::Error;

/// Errors surfaced by [`crate::cache::ItemCache`] operations.
///
/// A manifest read being needed has no variant here by design: it is
/// resolved entirely inside the retry loop in `cache` and never escapes
/// as a return value.
#[derive(Debug, Error)]
pub enum ItemCacheError {
    /// Allocation failed before the lock was taken.
    #[error("out of memory")]
    OutOfMemory,

    /// No such key (and, where applicable, the absence is range-confirmed).
    #[error("not found")]
    NotFound,

    /// A live (non-tombstone) item already exists at that key.
    #[error("already exists")]
    AlreadyExists,

    /// Bad arguments (e.g. `start > end`, oversized key, out-of-range
    /// `min_val_len`).
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// A size/length mismatch relative to caller expectations
    /// (`lookup_exact`, `next_same`, `next_same_min`).
    #[error("corruption: {0}")]
    Corruption(String),

    /// The caller's output buffer was too small; no partial write occurred.
    #[error("buffer too small: need {needed}, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Propagated unchanged from the manifest collaborator.
    #[error("manifest read failed: {0}")]
    Manifest(#[from] ManifestReadError),

    /// Lock poisoned or another invariant-level break occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error returned by a [`crate::segment::ManifestReader`] implementation.
///
/// Opaque to the cache: it is passed straight through to the caller via
/// [`ItemCacheError::Manifest`].
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ManifestReadError(pub String);
