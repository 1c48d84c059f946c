//! Column value matching used by row searches and filtered iteration.

use crate::table::Table;
use tessera_common::Value;

/// Decides whether a stored column value matches a searched-for value.
pub trait ColumnMatcher: Send + Sync {
    /// Returns true if `actual`, read from `column` of `table`, matches `pattern`.
    fn matches(&self, table: &Table, column: &str, pattern: &Value, actual: &Value) -> bool;

    /// True if texts differing only in case match.
    fn folds_case(&self) -> bool {
        false
    }
}

/// Exact matching. Numbers of different widths compare by value.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleColumnMatcher;

impl ColumnMatcher for SimpleColumnMatcher {
    fn matches(&self, _table: &Table, _column: &str, pattern: &Value, actual: &Value) -> bool {
        match (pattern.is_null(), actual.is_null()) {
            (true, true) => true,
            (false, false) => pattern.loosely_equals(actual),
            _ => false,
        }
    }
}

/// Like [`SimpleColumnMatcher`], but text compares case-insensitively.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseInsensitiveColumnMatcher;

impl ColumnMatcher for CaseInsensitiveColumnMatcher {
    fn matches(&self, table: &Table, column: &str, pattern: &Value, actual: &Value) -> bool {
        match (pattern, actual) {
            (Value::Text(a), Value::Text(b)) => a.to_lowercase() == b.to_lowercase(),
            _ => SimpleColumnMatcher.matches(table, column, pattern, actual),
        }
    }

    fn folds_case(&self) -> bool {
        true
    }
}
