//! Page structures for Tessera storage.

use crate::error::{Result, TesseraError};
use serde::{Deserialize, Serialize};

/// Page size in bytes (4 KB).
pub const PAGE_SIZE: usize = 4 * 1024;

/// A raw page buffer.
pub type PageBuf = Box<[u8; PAGE_SIZE]>;

/// Allocates a zeroed page buffer.
pub fn empty_page() -> PageBuf {
    Box::new([0u8; PAGE_SIZE])
}

/// Page number within the database file (0-indexed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// Marker for "no page" in on-disk links.
    pub const INVALID: PageId = PageId(u32::MAX);

    /// Returns true unless this is the INVALID marker.
    pub fn is_valid(&self) -> bool {
        self.0 != u32::MAX
    }

    /// Decodes an on-disk link, mapping the INVALID marker to None.
    pub fn from_link(raw: u32) -> Option<PageId> {
        if raw == u32::MAX { None } else { Some(PageId(raw)) }
    }

    /// Encodes an optional link for on-disk storage.
    pub fn to_link(page: Option<PageId>) -> u32 {
        page.map_or(u32::MAX, |p| p.0)
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

/// Page types in Tessera storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageType {
    /// Unallocated/free page.
    Free = 0,
    /// Table data page holding row slots.
    Data = 1,
    /// Index leaf page holding entries.
    IndexLeaf = 2,
    /// Index node page holding child references.
    IndexNode = 3,
}

impl PageType {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(PageType::Free),
            1 => Some(PageType::Data),
            2 => Some(PageType::IndexLeaf),
            3 => Some(PageType::IndexNode),
            _ => None,
        }
    }
}

/// Header structure at the beginning of every page.
///
/// Layout (16 bytes total):
/// - page_type: 1 byte
/// - flags: 1 byte
/// - entry_count: 2 bytes
/// - page_id: 4 bytes
/// - free_space_offset: 2 bytes
/// - reserved: 6 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// Type of this page.
    pub page_type: PageType,
    /// Page flags.
    pub flags: PageFlags,
    /// Number of rows/entries on this page.
    pub entry_count: u16,
    /// Page this header was written for.
    pub page_id: PageId,
    /// Offset to the start of free space within the page.
    pub free_space_offset: u16,
}

impl PageHeader {
    /// Size of the page header in bytes.
    pub const SIZE: usize = 16;

    /// Creates a new page header.
    pub fn new(page_id: PageId, page_type: PageType) -> Self {
        Self {
            page_type,
            flags: PageFlags::empty(),
            entry_count: 0,
            page_id,
            free_space_offset: Self::SIZE as u16,
        }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.page_type as u8;
        buf[1] = self.flags.0;
        buf[2..4].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[4..8].copy_from_slice(&self.page_id.0.to_le_bytes());
        buf[8..10].copy_from_slice(&self.free_space_offset.to_le_bytes());
        buf
    }

    /// Deserializes the header from bytes, failing on an unknown page type.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let page_id = PageId(u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]));
        let page_type = PageType::from_u8(buf[0]).ok_or_else(|| {
            TesseraError::corrupted(page_id.0, format!("unknown page type {}", buf[0]))
        })?;

        Ok(Self {
            page_type,
            flags: PageFlags(buf[1]),
            entry_count: u16::from_le_bytes([buf[2], buf[3]]),
            page_id,
            free_space_offset: u16::from_le_bytes([buf[8], buf[9]]),
        })
    }

    /// Reads the header of `buf` and checks it was written as `expected`
    /// for `page_id`.
    pub fn read_expecting(buf: &[u8], page_id: PageId, expected: PageType) -> Result<Self> {
        let header = Self::from_bytes(buf)?;
        if header.page_id != page_id {
            return Err(TesseraError::corrupted(
                page_id.0,
                format!("header names {}", header.page_id),
            ));
        }
        if header.page_type != expected {
            return Err(TesseraError::corrupted(
                page_id.0,
                format!("expected {:?} page, found {:?}", expected, header.page_type),
            ));
        }
        if header.free_space_offset as usize > PAGE_SIZE {
            return Err(TesseraError::corrupted(
                page_id.0,
                format!("free space offset {} past page end", header.free_space_offset),
            ));
        }
        Ok(header)
    }
}

/// Flags for page state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageFlags(u8);

impl PageFlags {
    /// No flags set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Index page holds the root of its tree.
    pub const ROOT: u8 = 0b0000_0001;

    /// Returns true if the root flag is set.
    pub fn is_root(&self) -> bool {
        self.0 & Self::ROOT != 0
    }

    /// Sets the root flag.
    pub fn set_root(&mut self, root: bool) {
        if root {
            self.0 |= Self::ROOT;
        } else {
            self.0 &= !Self::ROOT;
        }
    }
}
