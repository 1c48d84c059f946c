//! Index page layout constants.

use tessera_common::page::PageHeader;

/// Leaf header: prev leaf (4) + next leaf (4).
pub const LEAF_HEADER_SIZE: usize = 8;

/// Node header: level (2) + reserved (2) + leftmost child (4).
pub const NODE_HEADER_SIZE: usize = 8;

/// First entry byte of a leaf page.
pub const LEAF_ENTRIES_START: usize = PageHeader::SIZE + LEAF_HEADER_SIZE;

/// First entry byte of a node page.
pub const NODE_ENTRIES_START: usize = PageHeader::SIZE + NODE_HEADER_SIZE;

/// Per-entry framing: prefix length (2) + suffix length (2).
pub const ENTRY_FRAME_SIZE: usize = 4;

/// Child page reference in a node entry.
pub const CHILD_REF_SIZE: usize = 4;

/// Maximum tree height before traversal is treated as corruption.
pub const MAX_HEIGHT: u32 = 16;

/// Null marker in an ascending key column.
pub const NULL_MARKER: u8 = 0x00;

/// Present-value marker in an ascending key column.
pub const VALUE_MARKER: u8 = 0x7F;

/// Escape byte inside variable-length key columns.
pub const ESCAPE: u8 = 0x00;

/// Follows [`ESCAPE`] for an escaped zero byte.
pub const ESCAPED_ZERO: u8 = 0xFF;

/// Follows [`ESCAPE`] to end a variable-length column.
pub const TERMINATOR: u8 = 0x01;
