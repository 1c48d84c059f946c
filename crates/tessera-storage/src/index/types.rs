//! Entries, positions and traversal direction for index trees.

use super::order::{compare_bytes, prefix_successor};
use crate::row::RowId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Toward larger entries.
    Next,
    /// Toward smaller entries.
    Previous,
}

impl Direction {
    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            Direction::Next => Direction::Previous,
            Direction::Previous => Direction::Next,
        }
    }
}

/// An encoded key and the row it points to.
///
/// Entries order by key bytes, then by RowId. A sentinel RowId turns an
/// entry into a bound that sorts before (`First`) or after (`Last`) every
/// real entry with the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Order-preserving encoded key.
    pub key: Vec<u8>,
    /// Row the key was taken from.
    pub row_id: RowId,
}

impl IndexEntry {
    /// Fixed per-entry overhead used when sizing inline storage.
    pub const OVERHEAD: usize = 4 + RowId::SIZE;

    /// Creates an entry.
    pub fn new(key: impl Into<Vec<u8>>, row_id: RowId) -> Self {
        Self {
            key: key.into(),
            row_id,
        }
    }

    /// Bytes this entry occupies without prefix compression.
    #[inline]
    pub fn size(&self) -> usize {
        self.key.len() + Self::OVERHEAD
    }

    /// Compares only the key bytes.
    #[inline]
    pub fn compare_key(&self, key: &[u8]) -> Ordering {
        compare_bytes(&self.key, key)
    }
}

impl Ord for IndexEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_bytes(&self.key, &other.key).then_with(|| self.row_id.cmp(&other.row_id))
    }
}

impl PartialOrd for IndexEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A point in an index's total order.
///
/// `At` need not name a live entry: it may be a deleted entry or a bound
/// built from a sentinel RowId. Stepping always resolves against the
/// current tree contents.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryPosition {
    /// Before every entry.
    BeforeFirst,
    /// On (or in place of) an entry.
    At(IndexEntry),
    /// After every entry.
    AfterLast,
}

impl EntryPosition {
    /// Position just before the first entry whose key starts with `prefix`.
    pub fn before_prefix(prefix: &[u8]) -> Self {
        if prefix.is_empty() {
            return EntryPosition::BeforeFirst;
        }
        EntryPosition::At(IndexEntry::new(prefix, RowId::First))
    }

    /// Position just after the last entry whose key starts with `prefix`.
    pub fn after_prefix(prefix: &[u8]) -> Self {
        match prefix_successor(prefix) {
            Some(succ) => EntryPosition::At(IndexEntry::new(succ, RowId::First)),
            None => EntryPosition::AfterLast,
        }
    }

    /// The entry at this position, if any.
    pub fn entry(&self) -> Option<&IndexEntry> {
        match self {
            EntryPosition::At(entry) => Some(entry),
            _ => None,
        }
    }

    /// The boundary position a traversal in `direction` starts from.
    pub fn start_of(direction: Direction) -> Self {
        match direction {
            Direction::Next => EntryPosition::BeforeFirst,
            Direction::Previous => EntryPosition::AfterLast,
        }
    }

    /// The boundary position a traversal in `direction` ends at.
    pub fn end_of(direction: Direction) -> Self {
        Self::start_of(direction.reverse())
    }
}

/// How an index tree currently stores its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageKind {
    /// Entries held in the owning object.
    Inline,
    /// Entries held in a dedicated page tree.
    Paged,
}
