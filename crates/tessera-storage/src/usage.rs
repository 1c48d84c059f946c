//! Usage map for tracking which pages are allocated.
//!
//! One bit per page in the database file: set means the page is in use by a
//! table or index, clear means it may be handed out again by `allocate_page`.
//! The map is rebuilt from page headers when a file is opened, so it is never
//! written to disk itself.

use tessera_common::{PageId, Result, TesseraError};

const BITS_PER_WORD: u32 = 64;

/// Bitmap of used/free pages.
#[derive(Debug, Clone, Default)]
pub struct UsageMap {
    /// One bit per page, set when used.
    words: Vec<u64>,
    /// Number of pages covered.
    len: u32,
    /// Number of set bits.
    used: u32,
}

impl UsageMap {
    /// Creates an empty usage map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pages the map covers.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Returns true if the map covers no pages.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of pages marked used.
    pub fn used_count(&self) -> u32 {
        self.used
    }

    /// Extends the map to cover `page`, new pages starting out free.
    fn cover(&mut self, page: PageId) {
        if page.0 < self.len {
            return;
        }
        self.len = page.0 + 1;
        let words = self.len.div_ceil(BITS_PER_WORD) as usize;
        if self.words.len() < words {
            self.words.resize(words, 0);
        }
    }

    #[inline]
    fn locate(page: PageId) -> (usize, u64) {
        ((page.0 / BITS_PER_WORD) as usize, 1u64 << (page.0 % BITS_PER_WORD))
    }

    /// Returns true if the page is marked used.
    pub fn is_used(&self, page: PageId) -> bool {
        if page.0 >= self.len {
            return false;
        }
        let (word, bit) = Self::locate(page);
        self.words[word] & bit != 0
    }

    /// Returns the lowest free page, if any page in the map is free.
    pub fn can_allocate(&self) -> Option<PageId> {
        if self.used == self.len {
            return None;
        }
        for (i, word) in self.words.iter().enumerate() {
            if *word != u64::MAX {
                let page = i as u32 * BITS_PER_WORD + word.trailing_ones();
                if page < self.len {
                    return Some(PageId(page));
                }
            }
        }
        None
    }

    /// Marks a page used, extending the map if needed.
    pub fn mark_used(&mut self, page: PageId) {
        self.cover(page);
        let (word, bit) = Self::locate(page);
        if self.words[word] & bit == 0 {
            self.words[word] |= bit;
            self.used += 1;
        }
    }

    /// Marks a page free. Freeing a page that is not in use is an error.
    pub fn mark_free(&mut self, page: PageId) -> Result<()> {
        if !self.is_used(page) {
            return Err(TesseraError::IllegalState(format!(
                "{} is not allocated",
                page
            )));
        }
        let (word, bit) = Self::locate(page);
        self.words[word] &= !bit;
        self.used -= 1;
        Ok(())
    }

    /// Extends the map by one free page and returns its id.
    pub fn grow(&mut self) -> PageId {
        let page = PageId(self.len);
        self.cover(page);
        page
    }
}
