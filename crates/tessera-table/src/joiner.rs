//! Following foreign-key references between two tables.

use crate::cursor::Cursor;
use crate::schema::{ForeignKeyRef, IndexDef};
use crate::table::Table;
use tessera_common::{Result, TesseraError, Value};
use tessera_storage::{Row, RowId};

/// Finds the rows of `to_table` referenced by (or referencing) a row of
/// `from_table`, through a logical index that carries a foreign key.
#[derive(Debug, Clone)]
pub struct Joiner<'a> {
    from_table: &'a Table,
    from_index: &'a IndexDef,
    to_table: &'a Table,
    to_index: &'a IndexDef,
}

impl<'a> Joiner<'a> {
    /// Creates a joiner from `from_index`, whose foreign key must point at `to_table`.
    pub fn new(from_table: &'a Table, from_index: &str, to_table: &'a Table) -> Result<Self> {
        let from_index = from_table.index(from_index)?;
        let foreign_key = from_index.foreign_key.as_ref().ok_or_else(|| {
            TesseraError::InvalidArgument(format!(
                "index {}.{} has no foreign key reference",
                from_table.name(),
                from_index.name
            ))
        })?;
        if foreign_key.other_table != to_table.name() {
            return Err(TesseraError::InvalidArgument(format!(
                "index {}.{} references table {}, not {}",
                from_table.name(),
                from_index.name,
                foreign_key.other_table,
                to_table.name()
            )));
        }

        let to_index = to_table.index(&foreign_key.other_index)?;
        if to_index.columns.len() != from_index.columns.len() {
            return Err(TesseraError::InvalidArgument(format!(
                "index {}.{} has {} columns, {}.{} has {}",
                from_table.name(),
                from_index.name,
                from_index.columns.len(),
                to_table.name(),
                to_index.name,
                to_index.columns.len()
            )));
        }

        Ok(Self {
            from_table,
            from_index,
            to_table,
            to_index,
        })
    }

    pub fn from_table(&self) -> &'a Table {
        self.from_table
    }

    pub fn from_index(&self) -> &'a IndexDef {
        self.from_index
    }

    pub fn to_table(&self) -> &'a Table {
        self.to_table
    }

    pub fn to_index(&self) -> &'a IndexDef {
        self.to_index
    }

    /// The reference this joiner follows.
    pub fn foreign_key(&self) -> Option<&'a ForeignKeyRef> {
        self.from_index.foreign_key.as_ref()
    }

    /// The joiner walking the same relationship the other way.
    pub fn create_reverse(&self) -> Result<Joiner<'a>> {
        Joiner::new(self.to_table, &self.to_index.name, self.from_table)
    }

    /// Key values of `from_row` in the from index.
    fn entry_values(&self, from_row: &Row) -> Result<Vec<Value>> {
        self.from_index
            .columns
            .iter()
            .map(|column| {
                from_row
                    .get(&column.name)
                    .cloned()
                    .ok_or_else(|| TesseraError::ColumnNotFound(column.name.clone()))
            })
            .collect()
    }

    /// A cursor over exactly the to-rows whose key equals the from-row's.
    fn cursor_for(&self, from_row: &Row) -> Result<Cursor<'a>> {
        let values = self.entry_values(from_row)?;
        self.to_table
            .cursor_builder()
            .index(&self.to_index.name)
            .start_entry(values.clone(), true)
            .end_entry(values, true)
            .build()
    }

    /// Lazily yields the to-rows matching `from_row`.
    pub fn find_rows(&self, from_row: &Row) -> Result<JoinRows<'a>> {
        Ok(JoinRows {
            cursor: self.cursor_for(from_row)?,
            done: false,
        })
    }

    /// The first to-row matching `from_row`.
    pub fn find_first_row(&self, from_row: &Row) -> Result<Option<Row>> {
        self.find_rows(from_row)?.next().transpose()
    }

    /// True if any to-row matches `from_row`.
    pub fn has_rows(&self, from_row: &Row) -> Result<bool> {
        self.cursor_for(from_row)?.move_to_next_row()
    }

    /// Deletes every to-row matching `from_row`. Returns true if any was deleted.
    pub fn delete_rows(&self, from_row: &Row) -> Result<bool> {
        let mut cursor = self.cursor_for(from_row)?;
        let mut matched: Vec<RowId> = Vec::new();
        while cursor.move_to_next_row()? {
            if let Some(row_id) = cursor.current_row_id() {
                matched.push(row_id);
            }
        }
        drop(cursor);

        let mut deleted = false;
        for row_id in matched {
            deleted |= self.to_table.delete_row(row_id)?;
        }
        Ok(deleted)
    }
}

/// Rows found by [`Joiner::find_rows`].
pub struct JoinRows<'a> {
    cursor: Cursor<'a>,
    done: bool,
}

impl Iterator for JoinRows<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.cursor.move_to_next_row() {
                Ok(true) => match self.cursor.current_row() {
                    Ok(Some(row)) => return Some(Ok(row)),
                    Ok(None) => continue,
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
                Ok(false) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
