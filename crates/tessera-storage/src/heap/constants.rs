//! Data page layout constants.

use tessera_common::PAGE_SIZE;
use tessera_common::page::PageHeader;

/// Size of the data page header in bytes.
pub const DATA_HEADER_SIZE: usize = 8;

/// Offset of data header in page (after PageHeader).
pub const DATA_HEADER_OFFSET: usize = PageHeader::SIZE;

/// Offset where the slot array begins (after PageHeader + DataPageHeader).
pub const SLOTS_START: usize = PageHeader::SIZE + DATA_HEADER_SIZE;

/// Size of a row slot entry in bytes.
pub const ROW_SLOT_SIZE: usize = 4;

/// Length bit marking a tombstoned slot.
pub const DELETED_BIT: u16 = 0x8000;

/// Largest encoded row a single data page can hold.
pub const MAX_ROW_SIZE: usize = PAGE_SIZE - SLOTS_START - ROW_SLOT_SIZE;
