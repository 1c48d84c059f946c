//! Table data page using slotted page format.
//!
//! Page layout:
//! ```text
//! +------------------+
//! | Page Header (16) |
//! +------------------+
//! | Data Header (8)  |
//! +------------------+
//! | Slot Array       |  <- Grows downward
//! | (4 bytes/slot)   |
//! +------------------+
//! |                  |
//! | Free Space       |
//! |                  |
//! +------------------+
//! | Row Data         |  <- Grows upward
//! +------------------+
//! ```
//!
//! Slots are never reused. Deleting a row tombstones its slot so that a
//! RowId, once handed out, never names a different row.

use super::constants::{
    DATA_HEADER_OFFSET, DATA_HEADER_SIZE, DELETED_BIT, MAX_ROW_SIZE, ROW_SLOT_SIZE, SLOTS_START,
};
use tessera_common::page::{PageHeader, empty_page};
use tessera_common::{PAGE_SIZE, PageBuf, PageId, PageType, Result, TesseraError};

/// A slot in the slot array pointing to row data.
///
/// Layout (4 bytes):
/// - offset: 2 bytes (offset from page start to row data)
/// - length: 2 bytes (high bit set when tombstoned)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowSlot {
    /// Offset from page start to row data.
    pub offset: u16,
    /// Length of row data, with DELETED_BIT for tombstones.
    pub length: u16,
}

impl RowSlot {
    /// Size of a slot entry in bytes.
    pub const SIZE: usize = ROW_SLOT_SIZE;

    pub fn new(offset: u16, length: u16) -> Self {
        Self { offset, length }
    }

    /// Returns true if this slot has been tombstoned.
    pub fn is_deleted(&self) -> bool {
        self.length & DELETED_BIT != 0
    }

    /// Length of the stored bytes, ignoring the tombstone bit.
    pub fn data_len(&self) -> usize {
        (self.length & !DELETED_BIT) as usize
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.offset.to_le_bytes());
        buf[2..4].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            offset: u16::from_le_bytes([buf[0], buf[1]]),
            length: u16::from_le_bytes([buf[2], buf[3]]),
        }
    }
}

/// Data page header extension.
///
/// Layout (8 bytes):
/// - free_space_end: 2 bytes (start of row data)
/// - live_count: 2 bytes
/// - reserved: 4 bytes
#[derive(Debug, Clone, Copy)]
pub struct DataPageHeader {
    /// Offset where free space ends (before row data).
    pub free_space_end: u16,
    /// Number of slots that are not tombstoned.
    pub live_count: u16,
}

impl DataPageHeader {
    pub const SIZE: usize = DATA_HEADER_SIZE;
    pub const OFFSET: usize = DATA_HEADER_OFFSET;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.free_space_end.to_le_bytes());
        buf[2..4].copy_from_slice(&self.live_count.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            free_space_end: u16::from_le_bytes([buf[0], buf[1]]),
            live_count: u16::from_le_bytes([buf[2], buf[3]]),
        }
    }
}

/// A page of table rows.
pub struct DataPage {
    page_id: PageId,
    header: PageHeader,
    data: PageBuf,
}

impl DataPage {
    /// Creates a new empty data page.
    pub fn new(page_id: PageId) -> Self {
        let mut page = Self {
            page_id,
            header: PageHeader::new(page_id, PageType::Data),
            data: empty_page(),
        };
        page.set_data_header(DataPageHeader {
            free_space_end: PAGE_SIZE as u16,
            live_count: 0,
        });
        page.sync_header();
        page
    }

    /// Parses a page read from the store, checking its header and slot array.
    pub fn from_bytes(page_id: PageId, data: PageBuf) -> Result<Self> {
        let header = PageHeader::read_expecting(&data[..], page_id, PageType::Data)?;
        let page = Self {
            page_id,
            header,
            data,
        };

        let slots_end = page.slots_end();
        let data_header = page.data_header();
        if slots_end > data_header.free_space_end as usize || slots_end > PAGE_SIZE {
            return Err(TesseraError::corrupted(
                page_id.0,
                format!("slot array overlaps row data ({} slots)", page.header.entry_count),
            ));
        }
        for slot in 0..page.slot_count() {
            let s = page.slot(slot);
            if s.offset as usize + s.data_len() > PAGE_SIZE {
                return Err(TesseraError::corrupted(
                    page_id.0,
                    format!("slot {} points past page end", slot),
                ));
            }
        }
        Ok(page)
    }

    /// Returns the raw page data.
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    fn data_header(&self) -> DataPageHeader {
        let o = DataPageHeader::OFFSET;
        DataPageHeader::from_bytes(&self.data[o..o + DataPageHeader::SIZE])
    }

    fn set_data_header(&mut self, header: DataPageHeader) {
        let o = DataPageHeader::OFFSET;
        self.data[o..o + DataPageHeader::SIZE].copy_from_slice(&header.to_bytes());
    }

    fn sync_header(&mut self) {
        self.header.free_space_offset = self.slots_end() as u16;
        self.data[..PageHeader::SIZE].copy_from_slice(&self.header.to_bytes());
    }

    fn slots_end(&self) -> usize {
        SLOTS_START + self.header.entry_count as usize * RowSlot::SIZE
    }

    /// Number of slots ever handed out on this page.
    pub fn slot_count(&self) -> u16 {
        self.header.entry_count
    }

    /// Number of rows that are not tombstoned.
    pub fn live_count(&self) -> u16 {
        self.data_header().live_count
    }

    /// Contiguous free bytes between the slot array and row data.
    pub fn free_space(&self) -> usize {
        (self.data_header().free_space_end as usize).saturating_sub(self.slots_end())
    }

    /// Returns the slot entry; `slot` must be below `slot_count()`.
    pub fn slot(&self, slot: u16) -> RowSlot {
        let o = SLOTS_START + slot as usize * RowSlot::SIZE;
        RowSlot::from_bytes(&self.data[o..o + RowSlot::SIZE])
    }

    fn set_slot(&mut self, slot: u16, value: RowSlot) {
        let o = SLOTS_START + slot as usize * RowSlot::SIZE;
        self.data[o..o + RowSlot::SIZE].copy_from_slice(&value.to_bytes());
    }

    /// Bytes held by live rows.
    fn live_bytes(&self) -> usize {
        (0..self.slot_count())
            .map(|s| self.slot(s))
            .filter(|s| !s.is_deleted())
            .map(|s| s.data_len())
            .sum()
    }

    /// Free bytes available after compaction.
    pub fn usable_space(&self) -> usize {
        PAGE_SIZE.saturating_sub(self.slots_end() + self.live_bytes())
    }

    /// Returns true if a new row of `len` bytes fits, compacting if needed.
    pub fn can_fit(&self, len: usize) -> bool {
        len <= MAX_ROW_SIZE && self.usable_space() >= len + RowSlot::SIZE
    }

    /// Appends a row in a new slot and returns the slot number.
    pub fn insert(&mut self, row: &[u8]) -> Result<u16> {
        if !self.can_fit(row.len()) {
            return Err(TesseraError::PageFull);
        }
        if self.free_space() < row.len() + RowSlot::SIZE {
            self.compact();
        }

        let mut dh = self.data_header();
        dh.free_space_end -= row.len() as u16;
        let offset = dh.free_space_end as usize;
        self.data[offset..offset + row.len()].copy_from_slice(row);
        dh.live_count += 1;
        self.set_data_header(dh);

        let slot = self.header.entry_count;
        self.header.entry_count += 1;
        self.set_slot(slot, RowSlot::new(offset as u16, row.len() as u16));
        self.sync_header();
        Ok(slot)
    }

    /// Returns the row bytes at `slot`, or None if out of range or tombstoned.
    pub fn get(&self, slot: u16) -> Option<&[u8]> {
        if slot >= self.slot_count() {
            return None;
        }
        let s = self.slot(slot);
        if s.is_deleted() {
            return None;
        }
        let start = s.offset as usize;
        Some(&self.data[start..start + s.data_len()])
    }

    /// Returns true if `slot` holds a live row.
    pub fn is_live(&self, slot: u16) -> bool {
        slot < self.slot_count() && !self.slot(slot).is_deleted()
    }

    /// Tombstones a row. Returns false if it was already gone.
    pub fn delete(&mut self, slot: u16) -> bool {
        if !self.is_live(slot) {
            return false;
        }
        let mut s = self.slot(slot);
        s.length |= DELETED_BIT;
        self.set_slot(slot, s);

        let mut dh = self.data_header();
        dh.live_count -= 1;
        self.set_data_header(dh);
        true
    }

    /// Replaces a live row's bytes, keeping its slot.
    pub fn update(&mut self, slot: u16, row: &[u8]) -> Result<()> {
        if !self.is_live(slot) {
            return Err(TesseraError::IllegalState(format!(
                "slot {} on {} holds no row",
                slot, self.page_id
            )));
        }
        let old = self.slot(slot);
        if row.len() <= old.data_len() {
            let start = old.offset as usize;
            self.data[start..start + row.len()].copy_from_slice(row);
            self.set_slot(slot, RowSlot::new(old.offset, row.len() as u16));
            return Ok(());
        }

        // Room needed once the old copy is released.
        if self.usable_space() + old.data_len() < row.len() {
            return Err(TesseraError::PageFull);
        }
        self.set_slot(slot, RowSlot::new(0, DELETED_BIT));
        if self.free_space() < row.len() {
            self.compact();
        }
        let mut dh = self.data_header();
        dh.free_space_end -= row.len() as u16;
        let offset = dh.free_space_end as usize;
        self.data[offset..offset + row.len()].copy_from_slice(row);
        self.set_data_header(dh);
        self.set_slot(slot, RowSlot::new(offset as u16, row.len() as u16));
        Ok(())
    }

    /// Packs live rows against the page end, dropping tombstoned bytes.
    pub fn compact(&mut self) {
        let mut live: Vec<(u16, Vec<u8>)> = Vec::new();
        for slot in 0..self.slot_count() {
            let s = self.slot(slot);
            if s.is_deleted() {
                self.set_slot(slot, RowSlot::new(0, DELETED_BIT));
            } else {
                let start = s.offset as usize;
                live.push((slot, self.data[start..start + s.data_len()].to_vec()));
            }
        }

        let mut end = PAGE_SIZE;
        for (slot, bytes) in &live {
            end -= bytes.len();
            self.data[end..end + bytes.len()].copy_from_slice(bytes);
            self.set_slot(*slot, RowSlot::new(end as u16, bytes.len() as u16));
        }

        let mut dh = self.data_header();
        dh.free_space_end = end as u16;
        self.set_data_header(dh);
    }

    /// First live slot after `after` (or from the start when None).
    pub fn next_live_slot(&self, after: Option<u16>) -> Option<u16> {
        let start = after.map_or(0, |s| s as u32 + 1);
        (start..self.slot_count() as u32)
            .map(|s| s as u16)
            .find(|s| !self.slot(*s).is_deleted())
    }

    /// Last live slot before `before` (or from the end when None).
    pub fn prev_live_slot(&self, before: Option<u16>) -> Option<u16> {
        let end = before.map_or(self.slot_count(), |s| s.min(self.slot_count()));
        (0..end).rev().find(|s| !self.slot(*s).is_deleted())
    }
}
