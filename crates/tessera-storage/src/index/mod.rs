//! Index engine: key encoding, byte ordering and the index page tree.
//!
//! ```text
//! values --EntryCodec--> key bytes --+ RowId--> IndexEntry --> IndexPageTree
//!                                                              |
//!                                              inline Vec  or  leaf/node pages
//! ```
//!
//! Keys compare with plain unsigned byte order (see [`order`]), so the tree
//! never needs to know column types. Sentinel RowIds turn a key prefix into
//! a range bound.

pub mod codec;
pub mod constants;
pub mod order;
pub mod page;
pub mod tree;
pub mod types;

pub use codec::{EntryCodec, IndexColumn, fold_text};
pub use order::{compare_bytes, has_prefix, prefix_successor, shared_prefix_len};
pub use page::{LeafPage, NodePage};
pub use tree::{EntryIter, IndexPageTree, TreeRoot};
pub use types::{Direction, EntryPosition, IndexEntry, StorageKind};
