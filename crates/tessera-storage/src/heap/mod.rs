//! Table row storage.
//!
//! This module provides:
//! - DataPage: slotted page format with tombstoned, never-reused slots
//! - RowHeap: a table's data pages, addressed and scanned by RowId

pub mod constants;
mod file;
mod page;

pub use file::RowHeap;
pub use page::{DataPage, DataPageHeader, RowSlot};
