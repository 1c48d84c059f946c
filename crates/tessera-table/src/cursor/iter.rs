//! Row iteration on top of cursor moves.

use super::Cursor;
use tessera_common::{Result, TesseraError, Value};
use tessera_storage::{Direction, Row, RowId};

/// How a [`RowIter`] walks its cursor.
#[derive(Debug, Clone, Default)]
pub struct IterOptions {
    reverse: bool,
    keep_position: bool,
    columns: Option<Vec<String>>,
    pattern: Vec<(String, Value)>,
}

impl IterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks backward from after the last row.
    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// With `false`, iteration continues from wherever the cursor sits,
    /// starting with its current row if that row is live.
    pub fn reset(mut self, reset: bool) -> Self {
        self.keep_position = !reset;
        self
    }

    /// Decodes and yields only these columns.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Yields only rows whose `column` matches `value`.
    pub fn matching(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.pattern.push((column.into(), value.into()));
        self
    }
}

/// Lazy row sequence driven by a cursor.
///
/// The iterator and the cursor share one position: moves made on the
/// cursor between calls are picked up by the next call.
pub struct RowIter<'c, 't> {
    cursor: &'c mut Cursor<'t>,
    direction: Direction,
    /// Columns to decode: the projection plus pattern columns.
    decode: Option<Vec<String>>,
    projection: Option<Vec<String>>,
    pattern: Vec<(String, Value)>,
    /// Encoded key prefix every yielded entry must carry.
    prefix: Option<Vec<u8>>,
    started: bool,
    pending: Option<Row>,
    last_yielded: Option<RowId>,
    removed: bool,
    done: bool,
}

impl<'c, 't> RowIter<'c, 't> {
    pub(crate) fn new(cursor: &'c mut Cursor<'t>, options: IterOptions, prefix: Option<Vec<u8>>) -> Self {
        let direction = if options.reverse {
            Direction::Previous
        } else {
            Direction::Next
        };
        if !options.keep_position {
            match direction {
                Direction::Next => cursor.before_first(),
                Direction::Previous => cursor.after_last(),
            }
        }

        let decode = options.columns.as_ref().map(|columns| {
            let mut decode = columns.clone();
            for (column, _) in &options.pattern {
                if !decode.contains(column) {
                    decode.push(column.clone());
                }
            }
            decode
        });

        Self {
            cursor,
            direction,
            decode,
            projection: options.columns,
            pattern: options.pattern,
            prefix,
            started: !options.keep_position,
            pending: None,
            last_yielded: None,
            removed: false,
            done: false,
        }
    }

    fn fetch(&mut self) -> Result<Option<Row>> {
        loop {
            if self.started {
                if !self.cursor.move_one(self.direction)? {
                    return Ok(None);
                }
            } else {
                self.started = true;
                if !self.cursor.is_on_live_row() {
                    continue;
                }
            }

            if let Some(prefix) = &self.prefix {
                if !Cursor::entry_has_prefix(self.cursor.position(), prefix) {
                    return Ok(None);
                }
            }
            let Some(row_id) = self.cursor.current_row_id() else {
                continue;
            };
            let Some(mut row) = self.cursor.table().get_row(row_id, self.decode.as_deref())? else {
                continue;
            };
            if !self.cursor.row_matches(&row, &self.pattern) {
                continue;
            }
            if let Some(projection) = &self.projection {
                row.retain_columns(projection);
            }
            return Ok(Some(row));
        }
    }

    /// True if another row will be yielded. Moves the cursor ahead to find it.
    pub fn has_next(&mut self) -> Result<bool> {
        if self.pending.is_some() {
            return Ok(true);
        }
        if self.done {
            return Ok(false);
        }
        match self.fetch()? {
            Some(row) => {
                self.pending = Some(row);
                Ok(true)
            }
            None => {
                self.done = true;
                Ok(false)
            }
        }
    }

    /// The next row, or `NoSuchElement` once exhausted.
    pub fn next_row(&mut self) -> Result<Row> {
        self.next().unwrap_or(Err(TesseraError::NoSuchElement))
    }

    /// Deletes the most recently yielded row. Allowed once per row.
    pub fn remove(&mut self) -> Result<()> {
        let row_id = match self.last_yielded {
            Some(row_id) if !self.removed => row_id,
            Some(row_id) => {
                return Err(TesseraError::IllegalState(format!("row {} was already removed", row_id)));
            }
            None => return Err(TesseraError::IllegalState("no row to remove".to_string())),
        };
        self.cursor.table().delete_row(row_id)?;
        self.removed = true;
        Ok(())
    }
}

impl Iterator for RowIter<'_, '_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.pending.take() {
            Some(row) => row,
            None if self.done => return None,
            None => match self.fetch() {
                Ok(Some(row)) => row,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            },
        };
        self.last_yielded = Some(row.id());
        self.removed = false;
        Some(Ok(row))
    }
}
