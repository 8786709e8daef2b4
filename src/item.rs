//! The item value stored per key and the public view handed back from
//! lookups.

use crate::key::Key;

/// A stored item's payload: live data, or a tombstone marking a logical
/// deletion.
///
/// A tagged enum rather than a deletion flag plus nullable value, so a
/// tombstone can never be constructed with a dangling value attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemState {
    Live(Vec<u8>),
    Tombstone,
}

impl ItemState {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, ItemState::Tombstone)
    }

    /// Byte length of the stored value; always zero for a tombstone.
    pub fn value_len(&self) -> usize {
        match self {
            ItemState::Live(v) => v.len(),
            ItemState::Tombstone => 0,
        }
    }
}

/// A read-only snapshot of a live item, returned by lookups. Tombstones
/// never materialize as an `ItemView` — `find`/`lookup` treat them as
/// absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemView {
    pub key: Key,
    pub value: Vec<u8>,
}

/// Flags emitted alongside an item when it is written to a segment.
/// A plain `u8` newtype rather than pulling in `bitflags` for a single
/// bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemFlags(pub u8);

impl ItemFlags {
    pub const NONE: ItemFlags = ItemFlags(0);
    pub const DELETION: ItemFlags = ItemFlags(0x1);

    pub fn is_deletion(self) -> bool {
        self.0 & Self::DELETION.0 != 0
    }
}
