//! Storage engine for Tessera.
//!
//! This crate provides:
//! - Page store contract with file-backed and in-memory stores
//! - Usage map and scoped write batches
//! - Row heap of slotted data pages addressed by RowId
//! - Row codec for typed column values
//! - Index engine: order-preserving key codec and the index page tree

mod disk;
mod heap;
pub mod index;
mod row;
mod store;
mod usage;

pub use disk::{DATA_FILE_NAME, DiskManager};
pub use heap::{DataPage, DataPageHeader, RowHeap, RowSlot};
pub use index::{
    Direction, EntryCodec, EntryIter, EntryPosition, IndexColumn, IndexEntry, IndexPageTree,
    StorageKind, TreeRoot,
};
pub use row::{Column, Row, RowCodec, RowId};
pub use store::{MemoryPageStore, PageStore, WriteBatch, begin_batch};
pub use usage::UsageMap;
