//! Page store contract and the in-memory store.
//!
//! Tables and indexes never touch files directly: every page read, write and
//! allocation goes through a [`PageStore`]. Stores are shared (`Arc<dyn
//! PageStore>`) between the tables and indexes of one database.

use crate::usage::UsageMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tessera_common::page::empty_page;
use tessera_common::{PAGE_SIZE, PageBuf, PageId, Result, TesseraError};
use tracing::warn;

/// Page-level I/O used by the row heap and the index trees.
pub trait PageStore: Send + Sync {
    /// Reads a copy of a page.
    fn read_page(&self, page_id: PageId) -> Result<PageBuf>;

    /// Writes a full page.
    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Hands out a free page, reusing freed pages before growing.
    fn allocate_page(&self) -> Result<PageId>;

    /// Returns a page to the usage map.
    fn free_page(&self, page_id: PageId) -> Result<()>;

    /// Number of pages the store covers, used or free.
    fn num_pages(&self) -> u32;

    /// Makes all written pages durable.
    fn flush(&self) -> Result<()>;

    /// Opens one level of write batching.
    fn enter_batch(&self);

    /// Closes one level of write batching, flushing when the outermost closes.
    fn exit_batch(&self) -> Result<()>;
}

/// Scoped write batch. Flushes are deferred until the outermost batch exits,
/// on success or failure alike.
#[must_use = "a write batch ends as soon as it is dropped"]
pub struct WriteBatch<'a> {
    store: &'a dyn PageStore,
    open: bool,
}

/// Opens a write batch on `store`.
pub fn begin_batch(store: &dyn PageStore) -> WriteBatch<'_> {
    store.enter_batch();
    WriteBatch { store, open: true }
}

impl WriteBatch<'_> {
    /// Ends the batch, surfacing any flush error.
    pub fn finish(mut self) -> Result<()> {
        self.open = false;
        self.store.exit_batch()
    }
}

impl Drop for WriteBatch<'_> {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            if let Err(e) = self.store.exit_batch() {
                warn!(error = %e, "write batch flush failed on scope exit");
            }
        }
    }
}

/// In-memory page store.
#[derive(Default)]
pub struct MemoryPageStore {
    pages: RwLock<Vec<PageBuf>>,
    usage: Mutex<UsageMap>,
    batch_depth: AtomicUsize,
    flushes: AtomicU64,
}

impl MemoryPageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of flushes performed, for observing batch deferral.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Number of pages currently allocated.
    pub fn used_pages(&self) -> u32 {
        self.usage.lock().used_count()
    }
}

impl PageStore for MemoryPageStore {
    fn read_page(&self, page_id: PageId) -> Result<PageBuf> {
        let pages = self.pages.read();
        let page = pages
            .get(page_id.0 as usize)
            .ok_or(TesseraError::PageNotFound { page_id: page_id.0 })?;
        Ok(page.clone())
    }

    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut pages = self.pages.write();
        let page = pages
            .get_mut(page_id.0 as usize)
            .ok_or(TesseraError::PageNotFound { page_id: page_id.0 })?;
        page.copy_from_slice(data);
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut usage = self.usage.lock();
        if let Some(page_id) = usage.can_allocate() {
            usage.mark_used(page_id);
            self.pages.write()[page_id.0 as usize] = empty_page();
            return Ok(page_id);
        }

        let page_id = usage.grow();
        usage.mark_used(page_id);
        self.pages.write().push(empty_page());
        Ok(page_id)
    }

    fn free_page(&self, page_id: PageId) -> Result<()> {
        self.usage.lock().mark_free(page_id)?;
        self.write_page(page_id, &empty_page())
    }

    fn num_pages(&self) -> u32 {
        self.pages.read().len() as u32
    }

    fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn enter_batch(&self) {
        self.batch_depth.fetch_add(1, Ordering::Relaxed);
    }

    fn exit_batch(&self) -> Result<()> {
        let prev = self.batch_depth.fetch_sub(1, Ordering::Relaxed);
        if prev == 1 { self.flush() } else { Ok(()) }
    }
}
