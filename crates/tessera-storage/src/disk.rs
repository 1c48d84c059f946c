//! Disk manager for page-level file I/O.

use crate::store::PageStore;
use crate::usage::UsageMap;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tessera_common::page::empty_page;
use tessera_common::{PAGE_SIZE, PageBuf, PageId, PageType, Result, StorageConfig, TesseraError};
use tracing::debug;

/// Name of the database file inside the data directory.
pub const DATA_FILE_NAME: &str = "tessera.db";

/// Reads and writes fixed-size pages of a single database file.
///
/// The usage map is rebuilt on open from the page type byte of every page,
/// so freed pages (written back as zeroes) are found again after a restart.
pub struct DiskManager {
    /// Configuration.
    config: StorageConfig,
    /// Open file handle.
    file: Mutex<FileHandle>,
    /// Used/free page bitmap.
    usage: Mutex<UsageMap>,
    /// Open write batches; fsync is skipped while non-zero.
    batch_depth: AtomicUsize,
}

/// Handle for the open data file.
struct FileHandle {
    /// The file handle.
    file: File,
    /// Number of pages in the file.
    num_pages: u32,
}

impl DiskManager {
    /// Opens (or creates) the database file in `config.data_dir`.
    pub fn open(config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let path = config.data_dir.join(DATA_FILE_NAME);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        let mut usage = UsageMap::new();
        let mut type_byte = [0u8; 1];
        for page_num in 0..num_pages {
            file.seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
            file.read_exact(&mut type_byte)?;
            let page_id = usage.grow();
            if type_byte[0] != PageType::Free as u8 {
                usage.mark_used(page_id);
            }
        }
        debug!(path = %path.display(), num_pages, used = usage.used_count(), "opened data file");

        Ok(Self {
            config,
            file: Mutex::new(FileHandle { file, num_pages }),
            usage: Mutex::new(usage),
            batch_depth: AtomicUsize::new(0),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Returns the path of the database file.
    pub fn file_path(&self) -> PathBuf {
        self.config.data_dir.join(DATA_FILE_NAME)
    }

    fn should_sync(&self) -> bool {
        self.config.fsync_enabled && self.batch_depth.load(Ordering::Relaxed) == 0
    }

    fn write_at(&self, handle: &mut FileHandle, page_id: PageId, data: &[u8]) -> Result<()> {
        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.should_sync() {
            handle.file.sync_data()?;
        }

        if page_id.0 >= handle.num_pages {
            handle.num_pages = page_id.0 + 1;
        }
        Ok(())
    }
}

impl PageStore for DiskManager {
    fn read_page(&self, page_id: PageId) -> Result<PageBuf> {
        let mut handle = self.file.lock();

        if page_id.0 >= handle.num_pages {
            return Err(TesseraError::PageNotFound { page_id: page_id.0 });
        }

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = empty_page();
        handle.file.read_exact(&mut buffer[..])?;

        Ok(buffer)
    }

    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut handle = self.file.lock();
        if page_id.0 >= handle.num_pages {
            return Err(TesseraError::PageNotFound { page_id: page_id.0 });
        }
        self.write_at(&mut handle, page_id, data)
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut usage = self.usage.lock();
        let page_id = match usage.can_allocate() {
            Some(page_id) => page_id,
            None => usage.grow(),
        };

        // Zero the page so stale content never leaks into a new owner.
        let mut handle = self.file.lock();
        self.write_at(&mut handle, page_id, &[0u8; PAGE_SIZE])?;
        usage.mark_used(page_id);

        Ok(page_id)
    }

    fn free_page(&self, page_id: PageId) -> Result<()> {
        let mut usage = self.usage.lock();
        usage.mark_free(page_id)?;
        let mut handle = self.file.lock();
        self.write_at(&mut handle, page_id, &[0u8; PAGE_SIZE])
    }

    fn num_pages(&self) -> u32 {
        self.file.lock().num_pages
    }

    fn flush(&self) -> Result<()> {
        let handle = self.file.lock();
        handle.file.sync_all()?;
        Ok(())
    }

    fn enter_batch(&self) {
        self.batch_depth.fetch_add(1, Ordering::Relaxed);
    }

    fn exit_batch(&self) -> Result<()> {
        let prev = self.batch_depth.fetch_sub(1, Ordering::Relaxed);
        if prev == 1 && self.config.fsync_enabled {
            self.flush()
        } else {
            Ok(())
        }
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
