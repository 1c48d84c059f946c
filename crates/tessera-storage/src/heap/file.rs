//! Row heap: the set of data pages holding one table's rows.

use super::page::DataPage;
use crate::row::RowId;
use crate::store::PageStore;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;
use tessera_common::{PageId, Result, TesseraError};

/// A table's rows, addressed by RowId.
///
/// Rows are appended to the most recently allocated page; a new page is
/// taken from the store when it is full. Table scans walk rows in RowId
/// order, which is page id then slot.
pub struct RowHeap {
    store: Arc<dyn PageStore>,
    /// Data pages owned by this table, ordered by page id.
    pages: BTreeSet<PageId>,
    /// Page receiving new rows.
    insert_page: Option<PageId>,
    /// Number of live rows.
    live_rows: u64,
}

impl RowHeap {
    /// Creates an empty heap.
    pub fn create(store: Arc<dyn PageStore>) -> Self {
        Self {
            store,
            pages: BTreeSet::new(),
            insert_page: None,
            live_rows: 0,
        }
    }

    /// Reattaches a heap to its existing data pages.
    pub fn open(store: Arc<dyn PageStore>, pages: &[PageId]) -> Result<Self> {
        let mut heap = Self::create(store);
        for page_id in pages {
            let page = heap.load(*page_id)?;
            heap.live_rows += page.live_count() as u64;
            heap.pages.insert(*page_id);
        }
        heap.insert_page = heap.pages.last().copied();
        Ok(heap)
    }

    /// Data pages owned by this heap, in page order.
    pub fn page_ids(&self) -> Vec<PageId> {
        self.pages.iter().copied().collect()
    }

    /// Number of live rows.
    pub fn live_count(&self) -> u64 {
        self.live_rows
    }

    fn load(&self, page_id: PageId) -> Result<DataPage> {
        DataPage::from_bytes(page_id, self.store.read_page(page_id)?)
    }

    fn store_page(&self, page: &DataPage) -> Result<()> {
        self.store.write_page(page.page_id(), page.as_bytes())
    }

    /// Splits a RowId into (page, slot) if it names a page of this heap.
    fn locate(&self, row_id: RowId) -> Option<(PageId, u16)> {
        match row_id {
            RowId::At { page, slot } if self.pages.contains(&page) => Some((page, slot)),
            _ => None,
        }
    }

    /// Returns the RowId the next insert of `len` bytes will receive,
    /// allocating a fresh page if the current insert page is full.
    pub fn reserve(&mut self, len: usize) -> Result<RowId> {
        if let Some(page_id) = self.insert_page {
            let page = self.load(page_id)?;
            if page.can_fit(len) {
                return Ok(RowId::new(page_id, page.slot_count()));
            }
        }

        let page = DataPage::new(self.store.allocate_page()?);
        if !page.can_fit(len) {
            return Err(TesseraError::InvalidArgument(format!(
                "row of {} bytes does not fit in a page",
                len
            )));
        }
        self.store_page(&page)?;
        self.pages.insert(page.page_id());
        self.insert_page = Some(page.page_id());
        Ok(RowId::new(page.page_id(), 0))
    }

    /// Stores a row at a RowId obtained from [`RowHeap::reserve`].
    pub fn insert_at(&mut self, row_id: RowId, row: &[u8]) -> Result<()> {
        let (page_id, slot) = self.locate(row_id).ok_or_else(|| {
            TesseraError::Internal(format!("{} was not reserved by this heap", row_id))
        })?;
        let mut page = self.load(page_id)?;
        let stored = page.insert(row)?;
        if stored != slot {
            return Err(TesseraError::Internal(format!(
                "reserved slot {} but row landed in {}",
                slot, stored
            )));
        }
        self.store_page(&page)?;
        self.live_rows += 1;
        Ok(())
    }

    /// Appends a row and returns its RowId.
    pub fn insert(&mut self, row: &[u8]) -> Result<RowId> {
        let row_id = self.reserve(row.len())?;
        self.insert_at(row_id, row)?;
        Ok(row_id)
    }

    /// Returns a copy of the row bytes, or None if the row does not exist.
    pub fn get(&self, row_id: RowId) -> Result<Option<Vec<u8>>> {
        let Some((page_id, slot)) = self.locate(row_id) else {
            return Ok(None);
        };
        let page = self.load(page_id)?;
        Ok(page.get(slot).map(<[u8]>::to_vec))
    }

    /// Returns true if the row exists and is not deleted.
    pub fn contains(&self, row_id: RowId) -> Result<bool> {
        let Some((page_id, slot)) = self.locate(row_id) else {
            return Ok(false);
        };
        Ok(self.load(page_id)?.is_live(slot))
    }

    /// Tombstones a row. Returns false if it did not exist.
    pub fn delete(&mut self, row_id: RowId) -> Result<bool> {
        let Some((page_id, slot)) = self.locate(row_id) else {
            return Ok(false);
        };
        let mut page = self.load(page_id)?;
        if !page.delete(slot) {
            return Ok(false);
        }
        self.store_page(&page)?;
        self.live_rows -= 1;
        Ok(true)
    }

    /// Replaces a row's bytes in place.
    pub fn update(&mut self, row_id: RowId, row: &[u8]) -> Result<()> {
        let (page_id, slot) = self
            .locate(row_id)
            .ok_or_else(|| TesseraError::IllegalState(format!("row {} does not exist", row_id)))?;
        let mut page = self.load(page_id)?;
        page.update(slot, row)?;
        self.store_page(&page)
    }

    /// First live row strictly after `after` in RowId order.
    pub fn next_row_id(&self, after: RowId) -> Result<Option<RowId>> {
        let (start, skip_to) = match after {
            RowId::First => (Bound::Unbounded, None),
            RowId::At { page, slot } => (Bound::Included(page), Some((page, slot))),
            RowId::Last => return Ok(None),
        };

        for page_id in self.pages.range((start, Bound::Unbounded)) {
            let page = self.load(*page_id)?;
            let after_slot = match skip_to {
                Some((p, s)) if p == *page_id => Some(s),
                _ => None,
            };
            if let Some(slot) = page.next_live_slot(after_slot) {
                return Ok(Some(RowId::new(*page_id, slot)));
            }
        }
        Ok(None)
    }

    /// Last live row strictly before `before` in RowId order.
    pub fn previous_row_id(&self, before: RowId) -> Result<Option<RowId>> {
        let (end, skip_to) = match before {
            RowId::First => return Ok(None),
            RowId::At { page, slot } => (Bound::Included(page), Some((page, slot))),
            RowId::Last => (Bound::Unbounded, None),
        };

        for page_id in self.pages.range((Bound::Unbounded, end)).rev() {
            let page = self.load(*page_id)?;
            let before_slot = match skip_to {
                Some((p, s)) if p == *page_id => Some(s),
                _ => None,
            };
            if let Some(slot) = page.prev_live_slot(before_slot) {
                return Ok(Some(RowId::new(*page_id, slot)));
            }
        }
        Ok(None)
    }
}
