//! Index leaf and node pages.
//!
//! Pages are decoded into owned entry lists, modified in memory, and
//! re-encoded on write. Entries are prefix-compressed against the previous
//! entry on the same page, so decoding needs at most one prior entry.
//!
//! Leaf page layout:
//! ```text
//! +-------------------------+ 0
//! | Page Header (16 bytes)  |
//! +-------------------------+ 16
//! | prev_leaf: u32          |
//! | next_leaf: u32          |
//! +-------------------------+ 24
//! | prefix_len: u16         |
//! | suffix_len: u16         |  <- one per entry
//! | suffix bytes            |
//! | row_id: 6 bytes         |
//! +-------------------------+ free_space_offset
//! ```
//!
//! Node pages carry `level: u16, reserved: u16, leftmost_child: u32` in place
//! of the leaf links, and each entry is followed by its child page id.

use super::constants::{
    CHILD_REF_SIZE, ENTRY_FRAME_SIZE, LEAF_ENTRIES_START, NODE_ENTRIES_START,
};
use super::order::shared_prefix_len;
use super::types::IndexEntry;
use crate::row::RowId;
use bytes::{Buf, BufMut};
use tessera_common::page::{PageFlags, PageHeader, empty_page};
use tessera_common::{PAGE_SIZE, PageBuf, PageId, PageType, Result, TesseraError};

/// Bytes taken by `entries` on a page, framing and compression included.
fn entries_size<'a>(entries: impl Iterator<Item = &'a IndexEntry>, extra: usize) -> usize {
    entry_sizes(entries, extra).into_iter().sum()
}

fn put_entry(buf: &mut &mut [u8], prev: &[u8], entry: &IndexEntry) -> Result<()> {
    let prefix = shared_prefix_len(prev, &entry.key).min(u16::MAX as usize);
    let suffix = &entry.key[prefix..];
    buf.put_u16_le(prefix as u16);
    buf.put_u16_le(suffix.len() as u16);
    buf.put_slice(suffix);
    entry.row_id.put(buf)
}

fn get_entry(buf: &mut &[u8], prev: &[u8], page_id: PageId) -> Result<IndexEntry> {
    let corrupt = |reason: &str| TesseraError::corrupted(page_id.0, reason.to_string());

    if buf.remaining() < ENTRY_FRAME_SIZE {
        return Err(corrupt("truncated entry frame"));
    }
    let prefix = buf.get_u16_le() as usize;
    let suffix = buf.get_u16_le() as usize;
    if prefix > prev.len() {
        return Err(corrupt("prefix longer than previous entry"));
    }
    if buf.remaining() < suffix + RowId::SIZE {
        return Err(corrupt("truncated entry"));
    }

    let mut key = Vec::with_capacity(prefix + suffix);
    key.extend_from_slice(&prev[..prefix]);
    key.extend_from_slice(&buf[..suffix]);
    buf.advance(suffix);
    let row_id = RowId::get(buf).ok_or_else(|| corrupt("truncated row id"))?;
    Ok(IndexEntry { key, row_id })
}

fn write_header(
    page: &mut [u8],
    page_id: PageId,
    page_type: PageType,
    root: bool,
    count: usize,
    end: usize,
) -> Result<()> {
    let mut header = PageHeader::new(page_id, page_type);
    header.entry_count = u16::try_from(count).map_err(|_| TesseraError::NodeFull)?;
    header.free_space_offset = end as u16;
    let mut flags = PageFlags::empty();
    flags.set_root(root);
    header.flags = flags;
    page[..PageHeader::SIZE].copy_from_slice(&header.to_bytes());
    Ok(())
}

/// A leaf page: sorted entries plus links to neighboring leaves.
#[derive(Debug, Clone)]
pub struct LeafPage {
    pub page_id: PageId,
    pub prev: Option<PageId>,
    pub next: Option<PageId>,
    pub entries: Vec<IndexEntry>,
    pub root: bool,
}

impl LeafPage {
    /// Creates an empty, unlinked leaf.
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            prev: None,
            next: None,
            entries: Vec::new(),
            root: false,
        }
    }

    /// Encoded size of this leaf.
    pub fn encoded_size(&self) -> usize {
        LEAF_ENTRIES_START + entries_size(self.entries.iter(), 0)
    }

    /// Returns true if the leaf fits in one page.
    pub fn fits(&self) -> bool {
        self.encoded_size() <= PAGE_SIZE
    }

    /// Position of `entry`, or where it would be inserted.
    pub fn search(&self, entry: &IndexEntry) -> std::result::Result<usize, usize> {
        self.entries.binary_search(entry)
    }

    pub fn to_bytes(&self) -> Result<PageBuf> {
        if !self.fits() {
            return Err(TesseraError::NodeFull);
        }
        let mut page = empty_page();
        let mut buf = &mut page[PageHeader::SIZE..];
        buf.put_u32_le(PageId::to_link(self.prev));
        buf.put_u32_le(PageId::to_link(self.next));

        let mut prev: &[u8] = &[];
        for entry in &self.entries {
            put_entry(&mut buf, prev, entry)?;
            prev = &entry.key;
        }
        let end = PAGE_SIZE - buf.len();
        write_header(
            &mut page[..],
            self.page_id,
            PageType::IndexLeaf,
            self.root,
            self.entries.len(),
            end,
        )?;
        Ok(page)
    }

    pub fn from_bytes(page_id: PageId, page: &[u8; PAGE_SIZE]) -> Result<Self> {
        let header = PageHeader::read_expecting(page, page_id, PageType::IndexLeaf)?;
        let end = header.free_space_offset as usize;
        if end < LEAF_ENTRIES_START {
            return Err(TesseraError::corrupted(page_id.0, "leaf entries end before header"));
        }

        let mut buf = &page[PageHeader::SIZE..end];
        let prev = PageId::from_link(buf.get_u32_le());
        let next = PageId::from_link(buf.get_u32_le());

        let mut entries: Vec<IndexEntry> = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let prev_key = entries.last().map(|e| e.key.as_slice()).unwrap_or(&[]);
            let entry = get_entry(&mut buf, prev_key, page_id)?;
            entries.push(entry);
        }
        if buf.has_remaining() {
            return Err(TesseraError::corrupted(page_id.0, "bytes after last leaf entry"));
        }

        Ok(Self {
            page_id,
            prev,
            next,
            entries,
            root: header.flags.is_root(),
        })
    }
}

/// A node page: child references separated by entries.
///
/// `children[i].0` is a lower bound on the entries under `children[i].1`
/// and an exclusive upper bound on those under the child to its left.
#[derive(Debug, Clone)]
pub struct NodePage {
    pub page_id: PageId,
    /// Distance to the leaves; 1 means children are leaves.
    pub level: u16,
    pub leftmost: PageId,
    pub children: Vec<(IndexEntry, PageId)>,
    pub root: bool,
}

impl NodePage {
    pub fn new(page_id: PageId, level: u16, leftmost: PageId) -> Self {
        Self {
            page_id,
            level,
            leftmost,
            children: Vec::new(),
            root: false,
        }
    }

    pub fn encoded_size(&self) -> usize {
        NODE_ENTRIES_START + entries_size(self.children.iter().map(|(e, _)| e), CHILD_REF_SIZE)
    }

    pub fn fits(&self) -> bool {
        self.encoded_size() <= PAGE_SIZE
    }

    /// Number of child pages.
    pub fn child_count(&self) -> usize {
        self.children.len() + 1
    }

    /// Child page at `index`, where 0 is the leftmost child.
    pub fn child(&self, index: usize) -> PageId {
        if index == 0 {
            self.leftmost
        } else {
            self.children[index - 1].1
        }
    }

    /// Index of the child whose range holds `target`.
    pub fn route(&self, target: &IndexEntry) -> usize {
        self.children.partition_point(|(sep, _)| sep <= target)
    }

    /// Inserts a separator for a new child directly right of child `index`.
    pub fn insert_child(&mut self, index: usize, separator: IndexEntry, child: PageId) {
        self.children.insert(index, (separator, child));
    }

    /// Drops the child at `index`. Removing the leftmost child promotes the
    /// next one; returns false if the node has no children left.
    pub fn remove_child(&mut self, index: usize) -> bool {
        if index == 0 {
            if self.children.is_empty() {
                return false;
            }
            let (_, next) = self.children.remove(0);
            self.leftmost = next;
        } else {
            self.children.remove(index - 1);
        }
        true
    }

    pub fn to_bytes(&self) -> Result<PageBuf> {
        if !self.fits() {
            return Err(TesseraError::NodeFull);
        }
        let mut page = empty_page();
        let mut buf = &mut page[PageHeader::SIZE..];
        buf.put_u16_le(self.level);
        buf.put_u16_le(0);
        buf.put_u32_le(self.leftmost.0);

        let mut prev: &[u8] = &[];
        for (separator, child) in &self.children {
            put_entry(&mut buf, prev, separator)?;
            buf.put_u32_le(child.0);
            prev = &separator.key;
        }
        let end = PAGE_SIZE - buf.len();
        write_header(
            &mut page[..],
            self.page_id,
            PageType::IndexNode,
            self.root,
            self.children.len(),
            end,
        )?;
        Ok(page)
    }

    pub fn from_bytes(page_id: PageId, page: &[u8; PAGE_SIZE]) -> Result<Self> {
        let header = PageHeader::read_expecting(page, page_id, PageType::IndexNode)?;
        let end = header.free_space_offset as usize;
        if end < NODE_ENTRIES_START {
            return Err(TesseraError::corrupted(page_id.0, "node entries end before header"));
        }

        let mut buf = &page[PageHeader::SIZE..end];
        let level = buf.get_u16_le();
        let _reserved = buf.get_u16_le();
        let leftmost = PageId(buf.get_u32_le());
        if level == 0 {
            return Err(TesseraError::corrupted(page_id.0, "node page at level 0"));
        }

        let mut children: Vec<(IndexEntry, PageId)> =
            Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let prev_key = children.last().map(|(e, _)| e.key.as_slice()).unwrap_or(&[]);
            let separator = get_entry(&mut buf, prev_key, page_id)?;
            if buf.remaining() < CHILD_REF_SIZE {
                return Err(TesseraError::corrupted(page_id.0, "truncated child reference"));
            }
            children.push((separator, PageId(buf.get_u32_le())));
        }
        if buf.has_remaining() {
            return Err(TesseraError::corrupted(page_id.0, "bytes after last node entry"));
        }

        Ok(Self {
            page_id,
            level,
            leftmost,
            children,
            root: header.flags.is_root(),
        })
    }
}

/// Splits `len` items at roughly half of `total` bytes, given each item's
/// size. Both halves are non-empty when `len >= 2`.
pub fn split_point(sizes: impl Iterator<Item = usize>, total: usize, len: usize) -> usize {
    let mut acc = 0;
    let mut at = len;
    for (i, size) in sizes.enumerate() {
        acc += size;
        if acc >= total / 2 {
            at = i + 1;
            break;
        }
    }
    at.clamp(1, len.saturating_sub(1).max(1))
}

/// Per-entry page sizes, compression included, plus `extra` bytes each.
pub fn entry_sizes<'a>(entries: impl Iterator<Item = &'a IndexEntry>, extra: usize) -> Vec<usize> {
    let mut prev: &[u8] = &[];
    entries
        .map(|entry| {
            let prefix = shared_prefix_len(prev, &entry.key);
            prev = &entry.key;
            ENTRY_FRAME_SIZE + (entry.key.len() - prefix) + RowId::SIZE + extra
        })
        .collect()
}
