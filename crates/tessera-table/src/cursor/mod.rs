//! Cursors over a table or one of its indexes.
//!
//! A cursor is a position plus the rules for moving it. It never holds
//! pages: every move re-resolves the position against the live heap or
//! index tree, so any number of cursors can share a table while rows are
//! added and removed.
//!
//! ```text
//!   BEFORE_FIRST <-> row <-> row <-> ... <-> row <-> AFTER_LAST
//!   (start bound)                                    (end bound)
//! ```
//!
//! Table cursors walk rows in RowId order between the `First` and `Last`
//! sentinels. Index cursors walk entries in (key, RowId) order, optionally
//! restricted to a sub-range whose bounds are never themselves entries.

mod iter;
mod matcher;
mod savepoint;

pub use iter::{IterOptions, RowIter};
pub use matcher::{CaseInsensitiveColumnMatcher, ColumnMatcher, SimpleColumnMatcher};
pub use savepoint::{Position, Savepoint, SourceId};

use crate::table::{ObserverGuard, Table};
use std::sync::Arc;
use tessera_common::{Result, TesseraError, Value};
use tessera_storage::index::has_prefix;
use tessera_storage::{Direction, EntryCodec, EntryPosition, Row, RowId};

/// The index a cursor walks.
#[derive(Debug, Clone)]
struct CursorIndex {
    name: String,
    slot: usize,
    data_id: u64,
    codec: EntryCodec,
    ignore_nulls: bool,
}

/// Builds table and index cursors.
pub struct CursorBuilder<'t> {
    table: &'t Table,
    index: Option<String>,
    start: Option<(Vec<Value>, bool)>,
    end: Option<(Vec<Value>, bool)>,
    matcher: Option<Arc<dyn ColumnMatcher>>,
}

impl<'t> CursorBuilder<'t> {
    pub fn new(table: &'t Table) -> Self {
        Self {
            table,
            index: None,
            start: None,
            end: None,
            matcher: None,
        }
    }

    /// Walks the named logical index instead of the table.
    pub fn index(mut self, name: &str) -> Self {
        self.index = Some(name.to_string());
        self
    }

    /// Lower bound given as leading key column values.
    pub fn start_entry(mut self, values: Vec<Value>, inclusive: bool) -> Self {
        self.start = Some((values, inclusive));
        self
    }

    /// Upper bound given as leading key column values.
    pub fn end_entry(mut self, values: Vec<Value>, inclusive: bool) -> Self {
        self.end = Some((values, inclusive));
        self
    }

    pub fn column_matcher(mut self, matcher: Arc<dyn ColumnMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Opens the cursor, initializing the index counts if needed.
    pub fn build(self) -> Result<Cursor<'t>> {
        let matcher = self
            .matcher
            .unwrap_or_else(|| Arc::new(SimpleColumnMatcher) as Arc<dyn ColumnMatcher>);
        let Some(name) = self.index else {
            if self.start.is_some() || self.end.is_some() {
                return Err(TesseraError::InvalidArgument(
                    "sub-range bounds need an index cursor".to_string(),
                ));
            }
            return Ok(Cursor::new(
                self.table,
                None,
                Position::Row(RowId::First),
                Position::Row(RowId::Last),
                matcher,
            ));
        };

        let slot = self.table.index_slot(&name)?;
        let index = {
            let mut state = self.table.write_state();
            let data = state.index_mut(slot)?;
            data.initialize()?;
            CursorIndex {
                name,
                slot,
                data_id: data.id(),
                codec: data.codec().clone(),
                ignore_nulls: data.ignores_nulls(),
            }
        };

        let start = match self.start {
            Some((values, inclusive)) if !values.is_empty() => {
                let prefix = index.codec.encode_prefix(&values)?;
                if inclusive {
                    EntryPosition::before_prefix(&prefix)
                } else {
                    EntryPosition::after_prefix(&prefix)
                }
            }
            _ => EntryPosition::BeforeFirst,
        };
        let end = match self.end {
            Some((values, inclusive)) if !values.is_empty() => {
                let prefix = index.codec.encode_prefix(&values)?;
                if inclusive {
                    EntryPosition::after_prefix(&prefix)
                } else {
                    EntryPosition::before_prefix(&prefix)
                }
            }
            _ => EntryPosition::AfterLast,
        };
        if start > end {
            return Err(TesseraError::InvalidArgument(format!(
                "start bound of index {} cursor lies after its end bound",
                index.name
            )));
        }

        Ok(Cursor::new(
            self.table,
            Some(index),
            Position::Entry(start),
            Position::Entry(end),
            matcher,
        ))
    }
}

/// A movable position over a table or index.
pub struct Cursor<'t> {
    table: &'t Table,
    index: Option<CursorIndex>,
    /// Before-first boundary (exclusive).
    start: Position,
    /// After-last boundary (exclusive).
    end: Position,
    position: Position,
    matcher: Arc<dyn ColumnMatcher>,
    observer: ObserverGuard<'t>,
}

impl<'t> Cursor<'t> {
    fn new(
        table: &'t Table,
        index: Option<CursorIndex>,
        start: Position,
        end: Position,
        matcher: Arc<dyn ColumnMatcher>,
    ) -> Self {
        Self {
            table,
            index,
            position: start.clone(),
            start,
            end,
            matcher,
            observer: table.register_observer(),
        }
    }

    /// A cursor in table order with the default matcher.
    pub(crate) fn table_scan(table: &'t Table) -> Self {
        Self::new(
            table,
            None,
            Position::Row(RowId::First),
            Position::Row(RowId::Last),
            Arc::new(SimpleColumnMatcher),
        )
    }

    pub fn table(&self) -> &'t Table {
        self.table
    }

    /// Logical index walked, or None for table order.
    pub fn index_name(&self) -> Option<&str> {
        self.index.as_ref().map(|i| i.name.as_str())
    }

    pub fn source_id(&self) -> SourceId {
        SourceId {
            table: self.table.id(),
            index_data: self.index.as_ref().map(|i| i.data_id),
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn is_before_first(&self) -> bool {
        self.position == self.start
    }

    pub fn is_after_last(&self) -> bool {
        self.position == self.end
    }

    /// The row the cursor sits on, live or just deleted.
    pub fn current_row_id(&self) -> Option<RowId> {
        self.position.row_id()
    }

    /// True if the current row was deleted since the cursor moved onto it.
    pub fn is_current_row_deleted(&self) -> bool {
        self.observer.observer().is_deleted()
    }

    pub(crate) fn is_on_live_row(&self) -> bool {
        self.current_row_id().is_some() && !self.is_current_row_deleted()
    }

    /// Moves before the first row.
    pub fn before_first(&mut self) {
        self.set_position(self.start.clone());
    }

    /// Moves after the last row.
    pub fn after_last(&mut self) {
        self.set_position(self.end.clone());
    }

    /// Same as [`Cursor::before_first`].
    pub fn reset(&mut self) {
        self.before_first();
    }

    fn set_position(&mut self, position: Position) {
        self.observer.observer().watch(position.row_id());
        self.position = position;
    }

    fn boundary(&self, direction: Direction) -> &Position {
        match direction {
            Direction::Next => &self.end,
            Direction::Previous => &self.start,
        }
    }

    fn require_index(&self) -> Result<&CursorIndex> {
        self.index.as_ref().ok_or_else(|| {
            TesseraError::InvalidArgument(format!(
                "cursor over table {} is not index-backed",
                self.table.name()
            ))
        })
    }

    /// The position one row from `from`, or the boundary.
    fn step_from(&self, from: &Position, direction: Direction) -> Result<Position> {
        let state = self.table.read_state();
        let next = match (from, &self.index) {
            (Position::Row(row_id), None) => {
                let found = match direction {
                    Direction::Next => state.heap.next_row_id(*row_id)?,
                    Direction::Previous => state.heap.previous_row_id(*row_id)?,
                };
                Position::Row(found.unwrap_or(match direction {
                    Direction::Next => RowId::Last,
                    Direction::Previous => RowId::First,
                }))
            }
            (Position::Entry(entry), Some(index)) => {
                Position::Entry(state.index(index.slot)?.tree().step(entry, direction)?)
            }
            _ => {
                return Err(TesseraError::Internal(format!(
                    "cursor position {:?} does not match its source",
                    from
                )));
            }
        };

        let boundary = self.boundary(direction);
        let past = match direction {
            Direction::Next => next >= *boundary,
            Direction::Previous => next <= *boundary,
        };
        Ok(if past { boundary.clone() } else { next })
    }

    pub(crate) fn move_one(&mut self, direction: Direction) -> Result<bool> {
        let next = self.step_from(&self.position, direction)?;
        let moved = next != *self.boundary(direction);
        self.set_position(next);
        Ok(moved)
    }

    /// Moves to the next row. Returns false, and sits after the last row,
    /// when there is none.
    pub fn move_to_next_row(&mut self) -> Result<bool> {
        self.move_one(Direction::Next)
    }

    /// Moves to the previous row. Returns false, and sits before the first
    /// row, when there is none.
    pub fn move_to_previous_row(&mut self) -> Result<bool> {
        self.move_one(Direction::Previous)
    }

    /// Moves up to `n` rows forward, returning how many moves succeeded.
    pub fn move_next_rows(&mut self, n: usize) -> Result<usize> {
        self.move_rows(n, Direction::Next)
    }

    /// Moves up to `n` rows backward, returning how many moves succeeded.
    pub fn move_previous_rows(&mut self, n: usize) -> Result<usize> {
        self.move_rows(n, Direction::Previous)
    }

    fn move_rows(&mut self, n: usize, direction: Direction) -> Result<usize> {
        let mut moved = 0;
        while moved < n && self.move_one(direction)? {
            moved += 1;
        }
        Ok(moved)
    }

    /// The current row, or None at a boundary.
    ///
    /// A row deleted since the cursor moved onto it is still returned as it
    /// was stored.
    pub fn current_row(&self) -> Result<Option<Row>> {
        self.current_row_columns(None)
    }

    /// The current row, decoding only `columns` when given.
    pub fn current_row_columns(&self, columns: Option<&[String]>) -> Result<Option<Row>> {
        let Some(row_id) = self.current_row_id() else {
            return Ok(None);
        };
        let observer = self.observer.observer();
        if observer.is_deleted() {
            return match observer.deleted_row() {
                Some(raw) => self.table.row_codec().decode_row(row_id, &raw, columns).map(Some),
                None => Ok(None),
            };
        }
        self.table.get_row(row_id, columns)
    }

    /// The row a forward move would land on, without moving.
    pub fn next_row(&self) -> Result<Option<Row>> {
        self.peek(Direction::Next)
    }

    /// The row a backward move would land on, without moving.
    pub fn previous_row(&self) -> Result<Option<Row>> {
        self.peek(Direction::Previous)
    }

    fn peek(&self, direction: Direction) -> Result<Option<Row>> {
        let position = self.step_from(&self.position, direction)?;
        match position.row_id() {
            Some(row_id) => self.table.get_row(row_id, None),
            None => Ok(None),
        }
    }

    /// Column values of a row, checked against `pattern` with the cursor's matcher.
    pub(crate) fn row_matches<S: AsRef<str>>(&self, row: &Row, pattern: &[(S, Value)]) -> bool {
        pattern.iter().all(|(column, value)| {
            let column = column.as_ref();
            let actual = row.get(column).unwrap_or(&Value::Null);
            self.matcher.matches(self.table, column, value, actual)
        })
    }

    /// Encoded key prefix usable to seek `pattern` through the index, if any.
    fn pattern_prefix<S: AsRef<str>>(&self, pattern: &[(S, Value)]) -> Option<Vec<u8>> {
        let index = self.index.as_ref()?;
        if self.matcher.folds_case() && !index.codec.collation().folds_case() {
            return None;
        }

        let mut values = Vec::new();
        for column in index.codec.columns() {
            match pattern.iter().find(|(name, _)| name.as_ref() == column.name) {
                Some((_, value)) => values.push(value.clone()),
                None => break,
            }
        }
        if values.is_empty() || (index.ignore_nulls && values.iter().any(Value::is_null)) {
            return None;
        }
        index.codec.encode_prefix(&values).ok()
    }

    /// Where a prefix search starts: the prefix bound, clamped to the sub-range.
    fn prefix_start(&self, prefix: &[u8]) -> Position {
        let bound = Position::Entry(EntryPosition::before_prefix(prefix));
        std::cmp::max(bound, self.start.clone())
    }

    /// True if `position` is an entry (not a bound) whose key starts with `prefix`.
    pub(crate) fn entry_has_prefix(position: &Position, prefix: &[u8]) -> bool {
        match position {
            Position::Entry(EntryPosition::At(entry)) => {
                entry.row_id.is_valid() && has_prefix(&entry.key, prefix)
            }
            _ => false,
        }
    }

    /// First position after `from` whose row matches `pattern`.
    fn scan_for<S: AsRef<str>>(
        &self,
        from: Position,
        pattern: &[(S, Value)],
        prefix: Option<&[u8]>,
    ) -> Result<Option<Position>> {
        let columns: Vec<String> = pattern.iter().map(|(c, _)| c.as_ref().to_string()).collect();
        let mut position = from;
        loop {
            position = self.step_from(&position, Direction::Next)?;
            if position == self.end {
                return Ok(None);
            }
            if let Some(prefix) = prefix {
                if !Self::entry_has_prefix(&position, prefix) {
                    return Ok(None);
                }
            }
            let Some(row_id) = position.row_id() else {
                return Ok(None);
            };
            if let Some(row) = self.table.get_row(row_id, Some(&columns))? {
                if self.row_matches(&row, pattern) {
                    return Ok(Some(position));
                }
            }
        }
    }

    fn check_columns<S: AsRef<str>>(&self, pattern: &[(S, Value)]) -> Result<()> {
        for (column, _) in pattern {
            self.table.row_codec().column_index(column.as_ref())?;
        }
        Ok(())
    }

    /// Moves to the first row in the cursor's range whose columns match
    /// `pattern`. The cursor stays put when nothing matches.
    ///
    /// Index cursors seek directly when the pattern covers the leading key
    /// columns.
    pub fn find_first_row<S: AsRef<str>>(&mut self, pattern: &[(S, Value)]) -> Result<bool> {
        self.check_columns(pattern)?;
        let prefix = self.pattern_prefix(pattern);
        let from = match &prefix {
            Some(prefix) => self.prefix_start(prefix),
            None => self.start.clone(),
        };
        match self.scan_for(from, pattern, prefix.as_deref())? {
            Some(position) => {
                self.set_position(position);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Moves to the first row matching `column = value`.
    pub fn find_first_row_by_column(&mut self, column: &str, value: impl Into<Value>) -> Result<bool> {
        self.find_first_row(&[(column, value.into())])
    }

    /// Moves to the next matching row after the current position. The
    /// cursor stays put when nothing matches.
    pub fn find_next_row<S: AsRef<str>>(&mut self, pattern: &[(S, Value)]) -> Result<bool> {
        self.check_columns(pattern)?;
        match self.scan_for(self.position.clone(), pattern, None)? {
            Some(position) => {
                self.set_position(position);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Moves straight to a known row. Returns false, leaving the cursor
    /// where it was, if the row is gone or outside the cursor's range.
    pub fn find_row(&mut self, row_id: RowId) -> Result<bool> {
        if !row_id.is_valid() {
            return Ok(false);
        }

        let target = {
            let state = self.table.read_state();
            let Some(raw) = state.heap.get(row_id)? else {
                return Ok(false);
            };
            match &self.index {
                None => Position::Row(row_id),
                Some(index) => {
                    let values = self.table.row_values(row_id, &raw)?;
                    match state.index(index.slot)?.entry_for(&values, row_id)? {
                        Some(entry) => Position::Entry(EntryPosition::At(entry)),
                        None => return Ok(false),
                    }
                }
            }
        };

        if target <= self.start || target >= self.end {
            return Ok(false);
        }
        self.set_position(target);
        Ok(true)
    }

    /// Moves to the first entry whose leading key columns equal `values`.
    /// The cursor stays put when there is none.
    pub fn find_first_row_by_entry(&mut self, values: &[Value]) -> Result<bool> {
        let prefix = self.require_index()?.codec.encode_prefix(values)?;
        let position = self.step_from(&self.prefix_start(&prefix), Direction::Next)?;
        if !Self::entry_has_prefix(&position, &prefix) {
            return Ok(false);
        }
        self.set_position(position);
        Ok(true)
    }

    /// Moves to the first entry at or after `values`, or after the last
    /// row. Returns true if the cursor landed on a row.
    pub fn find_closest_row_by_entry(&mut self, values: &[Value]) -> Result<bool> {
        let prefix = self.require_index()?.codec.encode_prefix(values)?;
        let position = self.step_from(&self.prefix_start(&prefix), Direction::Next)?;
        let found = position != self.end;
        self.set_position(position);
        Ok(found)
    }

    /// Captures the current position.
    pub fn savepoint(&self) -> Savepoint {
        let observer = self.observer.observer();
        Savepoint {
            source: self.source_id(),
            position: self.position.clone(),
            deleted: observer.is_deleted().then(|| observer.deleted_row()),
        }
    }

    /// Returns to a saved position.
    ///
    /// Fails if the savepoint was taken on another table or index, or lies
    /// outside this cursor's range.
    pub fn restore_savepoint(&mut self, savepoint: &Savepoint) -> Result<()> {
        if savepoint.source != self.source_id() {
            return Err(TesseraError::InvalidArgument(format!(
                "savepoint from {:?} does not fit cursor over {:?}",
                savepoint.source,
                self.source_id()
            )));
        }
        if savepoint.position < self.start || savepoint.position > self.end {
            return Err(TesseraError::InvalidArgument(
                "savepoint lies outside the cursor range".to_string(),
            ));
        }
        self.set_position(savepoint.position.clone());

        // The saved row may have been deleted before or after the save.
        let observer = self.observer.observer();
        match &savepoint.deleted {
            Some(image) => observer.mark_deleted(image.clone()),
            None => {
                if let Some(row_id) = self.current_row_id() {
                    if !self.table.contains_row(row_id)? {
                        observer.mark_deleted(None);
                    }
                }
            }
        }
        Ok(())
    }

    fn live_row_id(&self) -> Result<RowId> {
        match self.current_row_id() {
            Some(row_id) if !self.is_current_row_deleted() => Ok(row_id),
            Some(row_id) => Err(TesseraError::IllegalState(format!("row {} was deleted", row_id))),
            None => Err(TesseraError::IllegalState("cursor is not on a row".to_string())),
        }
    }

    /// Replaces the values of the current row.
    pub fn update_current_row(&mut self, values: &[Value]) -> Result<()> {
        let row_id = self.live_row_id()?;
        self.table.update_row(row_id, values)
    }

    /// Deletes the current row. The cursor stays in place and reports the
    /// row as deleted.
    pub fn delete_current_row(&mut self) -> Result<()> {
        let row_id = self.live_row_id()?;
        self.table.delete_row(row_id)?;
        Ok(())
    }

    /// Iterates forward from before the first row.
    pub fn iter(&mut self) -> RowIter<'_, 't> {
        self.iter_with(IterOptions::new())
    }

    /// Iterates backward from after the last row.
    pub fn reverse_iter(&mut self) -> RowIter<'_, 't> {
        self.iter_with(IterOptions::new().reverse())
    }

    pub fn iter_with(&mut self, options: IterOptions) -> RowIter<'_, 't> {
        RowIter::new(self, options, None)
    }

    /// Iterates the rows whose leading key columns equal `values`.
    pub fn entry_iter(&mut self, values: &[Value]) -> Result<RowIter<'_, 't>> {
        let prefix = self.require_index()?.codec.encode_prefix(values)?;
        let start = self.prefix_start(&prefix);
        self.set_position(start);
        Ok(RowIter::new(self, IterOptions::new().reset(false), Some(prefix)))
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("table", &self.table.name())
            .field("index", &self.index_name())
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IndexDef, TableSchema};
    use tessera_common::{DataType, EngineConfig};
    use tessera_storage::{Column, IndexColumn, MemoryPageStore};

    fn numbers(keys: &[i32]) -> Table {
        let schema = TableSchema::new(
            "numbers",
            vec![Column::new("n", DataType::Long), Column::new("label", DataType::Text)],
        )
        .with_index(IndexDef::new("ByN", vec![IndexColumn::ascending("n", DataType::Long)]));
        let table = Table::create(Arc::new(MemoryPageStore::new()), schema, &EngineConfig::default()).unwrap();
        for &k in keys {
            table.add_row(&[Value::Long(k), Value::Text(format!("n{}", k))]).unwrap();
        }
        table
    }

    fn n(row: &Row) -> i32 {
        match row.get("n") {
            Some(Value::Long(v)) => *v,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_table_cursor_walks_both_ways() {
        let table = numbers(&[5, 3, 8]);
        let mut cursor = table.cursor();
        assert!(cursor.is_before_first());
        assert!(cursor.current_row().unwrap().is_none());

        assert!(cursor.move_to_next_row().unwrap());
        assert_eq!(n(&cursor.current_row().unwrap().unwrap()), 5);
        assert_eq!(n(&cursor.next_row().unwrap().unwrap()), 3);
        assert_eq!(n(&cursor.current_row().unwrap().unwrap()), 5);

        assert_eq!(cursor.move_next_rows(5).unwrap(), 2);
        assert!(cursor.is_after_last());
        assert!(!cursor.move_to_next_row().unwrap());

        assert!(cursor.move_to_previous_row().unwrap());
        assert_eq!(n(&cursor.current_row().unwrap().unwrap()), 8);
        assert_eq!(cursor.move_previous_rows(9).unwrap(), 2);
        assert!(cursor.is_before_first());
    }

    #[test]
    fn test_index_cursor_orders_by_key() {
        let table = numbers(&[5, 3, 8, 1]);
        let mut cursor = table.index_cursor("ByN").unwrap();
        let mut seen = Vec::new();
        while cursor.move_to_next_row().unwrap() {
            seen.push(n(&cursor.current_row().unwrap().unwrap()));
        }
        assert_eq!(seen, vec![1, 3, 5, 8]);
        assert_eq!(n(&cursor.previous_row().unwrap().unwrap()), 8);
    }

    #[test]
    fn test_find_row_and_bounds() {
        let table = numbers(&[0, 1, 2, 3, 4]);
        let ids: Vec<RowId> = {
            let mut scan = table.scan();
            let mut ids = Vec::new();
            while let Some(row) = scan.next_row().unwrap() {
                ids.push(row.id());
            }
            ids
        };

        let mut cursor = table
            .cursor_builder()
            .index("ByN")
            .start_entry(vec![Value::Long(1)], true)
            .end_entry(vec![Value::Long(3)], false)
            .build()
            .unwrap();
        assert!(cursor.find_row(ids[2]).unwrap());
        assert_eq!(cursor.current_row_id(), Some(ids[2]));
        assert!(!cursor.find_row(ids[3]).unwrap());
        assert_eq!(cursor.current_row_id(), Some(ids[2]));

        table.delete_row(ids[1]).unwrap();
        assert!(!cursor.find_row(ids[1]).unwrap());
        assert_eq!(cursor.current_row_id(), Some(ids[2]));
    }

    #[test]
    fn test_builder_rejects_bad_ranges() {
        let table = numbers(&[1]);
        let err = table
            .cursor_builder()
            .start_entry(vec![Value::Long(1)], true)
            .build()
            .unwrap_err();
        assert!(matches!(err, TesseraError::InvalidArgument(_)));

        let err = table
            .cursor_builder()
            .index("ByN")
            .start_entry(vec![Value::Long(5)], true)
            .end_entry(vec![Value::Long(2)], true)
            .build()
            .unwrap_err();
        assert!(matches!(err, TesseraError::InvalidArgument(_)));

        assert!(matches!(
            table.index_cursor("Missing").unwrap_err(),
            TesseraError::IndexNotFound(_)
        ));
    }

    #[test]
    fn test_cursor_deregisters_on_drop() {
        let table = numbers(&[]);
        {
            let _a = table.cursor();
            let _b = table.index_cursor("ByN").unwrap();
            assert_eq!(table.open_cursors(), 2);
        }
        assert_eq!(table.open_cursors(), 0);
    }

    #[test]
    fn test_savepoint_keeps_deleted_row() {
        let table = numbers(&[1, 2, 3]);
        let mut cursor = table.cursor();
        cursor.move_next_rows(2).unwrap();
        cursor.delete_current_row().unwrap();
        let saved = cursor.savepoint();
        assert!(saved.is_row_deleted());

        cursor.move_to_next_row().unwrap();
        cursor.restore_savepoint(&saved).unwrap();
        assert!(cursor.is_current_row_deleted());
        assert_eq!(n(&cursor.current_row().unwrap().unwrap()), 2);
        assert!(cursor.delete_current_row().is_err());

        // A row deleted after the save is deleted on restore too.
        cursor.before_first();
        cursor.move_to_next_row().unwrap();
        let first = cursor.savepoint();
        assert!(!first.is_row_deleted());
        let row_id = cursor.current_row_id().unwrap();
        cursor.after_last();
        table.delete_row(row_id).unwrap();
        cursor.restore_savepoint(&first).unwrap();
        assert!(cursor.is_current_row_deleted());
        assert!(cursor.current_row().unwrap().is_none());
        assert!(cursor.move_to_next_row().unwrap());
        assert_eq!(n(&cursor.current_row().unwrap().unwrap()), 3);
    }

    #[test]
    fn test_update_and_delete_current_row() {
        let table = numbers(&[1, 2]);
        let mut cursor = table.cursor();
        assert!(cursor.delete_current_row().is_err());

        cursor.move_to_next_row().unwrap();
        cursor
            .update_current_row(&[Value::Long(10), Value::from("ten")])
            .unwrap();
        assert_eq!(n(&cursor.current_row().unwrap().unwrap()), 10);

        cursor.delete_current_row().unwrap();
        assert!(cursor.is_current_row_deleted());
        assert!(matches!(
            cursor.delete_current_row(),
            Err(TesseraError::IllegalState(_))
        ));
        assert_eq!(n(&cursor.current_row().unwrap().unwrap()), 10);
        assert!(cursor.move_to_next_row().unwrap());
        assert!(!cursor.is_current_row_deleted());
        assert_eq!(n(&cursor.current_row().unwrap().unwrap()), 2);
    }
}
