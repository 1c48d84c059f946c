//! Table and index definitions.

use serde::{Deserialize, Serialize};
use tessera_storage::{Column, IndexColumn};

/// Reference from a logical index to the matching index of another table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    /// Table on the other side of the relationship.
    pub other_table: String,
    /// Logical index on the other table.
    pub other_index: String,
    /// True when this side is the "one" side of the relationship.
    pub primary_side: bool,
    /// Deleting a row on the primary side deletes the referencing rows.
    pub cascade_delete: bool,
}

impl ForeignKeyRef {
    pub fn new(other_table: impl Into<String>, other_index: impl Into<String>) -> Self {
        Self {
            other_table: other_table.into(),
            other_index: other_index.into(),
            primary_side: false,
            cascade_delete: false,
        }
    }

    /// Marks this side as the referenced ("one") side.
    pub fn primary_side(mut self) -> Self {
        self.primary_side = true;
        self
    }

    pub fn cascade_delete(mut self) -> Self {
        self.cascade_delete = true;
        self
    }
}

/// A logical index declared on a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<IndexColumn>,
    #[serde(default)]
    pub unique: bool,
    /// Rows with a null in any key column get no entry.
    #[serde(default)]
    pub ignore_nulls: bool,
    #[serde(default)]
    pub foreign_key: Option<ForeignKeyRef>,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, columns: Vec<IndexColumn>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
            ignore_nulls: false,
            foreign_key: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn ignore_nulls(mut self) -> Self {
        self.ignore_nulls = true;
        self
    }

    pub fn references(mut self, foreign_key: ForeignKeyRef) -> Self {
        self.foreign_key = Some(foreign_key);
        self
    }

    /// Names of the key columns in key order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// True if both definitions can be served by the same index data.
    pub(crate) fn shares_data_with(&self, other: &IndexDef) -> bool {
        self.columns == other.columns
            && self.unique == other.unique
            && self.ignore_nulls == other.ignore_nulls
    }
}

/// Column list of a table plus its logical indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
        }
    }

    /// Adds a logical index.
    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }
}

/// How [`crate::Table::find_index_for_columns`] compares column lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnMatch {
    /// The index covers exactly the given columns, in order.
    Exact,
    /// The given columns are the leading columns of the index.
    Prefix,
}
