//! Tessera tables, index data, cursors and joiners.
//!
//! A [`Table`] owns a row heap and one [`IndexData`] per distinct physical
//! index. Logical indexes with the same shape share index data. Rows are
//! read and changed through the table or through [`Cursor`]s, which walk
//! the table in RowId order or an index in key order.

pub mod cursor;
mod index_data;
mod joiner;
mod schema;
mod table;

pub use cursor::{
    CaseInsensitiveColumnMatcher, ColumnMatcher, Cursor, CursorBuilder, IterOptions, Position,
    RowIter, Savepoint, SimpleColumnMatcher, SourceId,
};
pub use index_data::{IndexData, PendingChange, PendingChanges};
pub use joiner::{JoinRows, Joiner};
pub use schema::{ColumnMatch, ForeignKeyRef, IndexDef, TableSchema};
pub use table::{Table, TableDescriptor, TableScan};
