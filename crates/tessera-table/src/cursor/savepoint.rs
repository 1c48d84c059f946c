//! Cursor positions and savepoints.

use tessera_storage::{EntryPosition, RowId};

/// Where a cursor sits within its table or index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Position {
    /// Table order. The `First` and `Last` sentinels are the boundaries.
    Row(RowId),
    /// Index order.
    Entry(EntryPosition),
}

impl Position {
    /// The row at this position, if it names one.
    pub fn row_id(&self) -> Option<RowId> {
        let row_id = match self {
            Position::Row(row_id) => *row_id,
            Position::Entry(EntryPosition::At(entry)) => entry.row_id,
            Position::Entry(_) => return None,
        };
        row_id.is_valid().then_some(row_id)
    }
}

/// Identity of what a cursor traverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId {
    pub table: u64,
    /// Index data walked, or None for table order.
    pub index_data: Option<u64>,
}

/// A saved cursor position. Only cursors over the same source accept it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    pub(crate) source: SourceId,
    pub(crate) position: Position,
    /// Set when the row at `position` had been deleted, with its stored
    /// bytes when they were still known.
    pub(crate) deleted: Option<Option<Vec<u8>>>,
}

impl Savepoint {
    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    /// True if the saved row had been deleted underneath the cursor.
    pub fn is_row_deleted(&self) -> bool {
        self.deleted.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::PageId;
    use tessera_storage::IndexEntry;

    #[test]
    fn test_position_row_id() {
        let rid = RowId::new(PageId(3), 1);
        assert_eq!(Position::Row(rid).row_id(), Some(rid));
        assert_eq!(Position::Row(RowId::First).row_id(), None);

        let at = Position::Entry(EntryPosition::At(IndexEntry::new(vec![1], rid)));
        assert_eq!(at.row_id(), Some(rid));
        let bound = Position::Entry(EntryPosition::before_prefix(&[1]));
        assert_eq!(bound.row_id(), None);
        assert_eq!(Position::Entry(EntryPosition::AfterLast).row_id(), None);
    }
}
