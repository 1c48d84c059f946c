//! IndexPageTree: sorted index entries over inline storage or a page tree.
//!
//! Small indexes keep their entries in a sorted vector owned by the tree.
//! Once the encoded entries outgrow the inline threshold they move, once and
//! for good, into a B+ tree of leaf and node pages allocated from the page
//! store. Both layouts expose the same ordered operations.
//!
//! Positions are plain values (see [`EntryPosition`]); every step
//! re-descends from the root, so positions stay valid across splits and
//! deletes made through any other handle.

use super::constants::{CHILD_REF_SIZE, MAX_HEIGHT};
use super::page::{LeafPage, NodePage, entry_sizes, split_point};
use super::types::{Direction, EntryPosition, IndexEntry, StorageKind};
use crate::store::PageStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_common::config::MAX_INDEX_KEY_SIZE;
use tessera_common::{PageId, Result, TesseraError};
use tracing::{debug, warn};

/// Persistent root of a tree, recorded by the owner so it can be reopened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeRoot {
    /// Entries kept inline, in order.
    Inline(Vec<IndexEntry>),
    /// Root page and number of page levels (1 = root is a leaf).
    Paged { root: PageId, height: u32 },
}

impl Default for TreeRoot {
    fn default() -> Self {
        TreeRoot::Inline(Vec::new())
    }
}

enum TreeStorage {
    Inline { entries: Vec<IndexEntry>, bytes: usize },
    Paged { root: PageId, height: u32 },
}

/// Node pages from the root down to a leaf, with the child index taken at each.
type Path = Vec<(NodePage, usize)>;

/// A leaf and its (prev, next) links, collected during validation.
type LeafLinks = (PageId, Option<PageId>, Option<PageId>);

/// Ordered set of index entries.
pub struct IndexPageTree {
    store: Arc<dyn PageStore>,
    storage: TreeStorage,
    inline_threshold: usize,
}

impl IndexPageTree {
    /// Creates an empty tree using inline storage.
    pub fn new(store: Arc<dyn PageStore>, inline_threshold: usize) -> Self {
        Self {
            store,
            storage: TreeStorage::Inline {
                entries: Vec::new(),
                bytes: 0,
            },
            inline_threshold,
        }
    }

    /// Reopens a tree from a recorded root.
    pub fn open(store: Arc<dyn PageStore>, root: TreeRoot, inline_threshold: usize) -> Result<Self> {
        let storage = match root {
            TreeRoot::Inline(mut entries) => {
                entries.sort();
                entries.dedup();
                let bytes = entries.iter().map(IndexEntry::size).sum();
                TreeStorage::Inline { entries, bytes }
            }
            TreeRoot::Paged { root, height } => {
                if height == 0 || height > MAX_HEIGHT {
                    return Err(TesseraError::corrupted(root.0, format!("bad tree height {}", height)));
                }
                let is_root = if height == 1 {
                    LeafPage::from_bytes(root, &*store.read_page(root)?)?.root
                } else {
                    NodePage::from_bytes(root, &*store.read_page(root)?)?.root
                };
                if !is_root {
                    return Err(TesseraError::corrupted(root.0, "root page lacks root flag"));
                }
                TreeStorage::Paged { root, height }
            }
        };
        Ok(Self {
            store,
            storage,
            inline_threshold,
        })
    }

    /// Snapshot of the root for persisting.
    pub fn root(&self) -> TreeRoot {
        match &self.storage {
            TreeStorage::Inline { entries, .. } => TreeRoot::Inline(entries.clone()),
            TreeStorage::Paged { root, height } => TreeRoot::Paged {
                root: *root,
                height: *height,
            },
        }
    }

    /// Which storage layout is active.
    pub fn storage_kind(&self) -> StorageKind {
        match self.storage {
            TreeStorage::Inline { .. } => StorageKind::Inline,
            TreeStorage::Paged { .. } => StorageKind::Paged,
        }
    }

    /// Page levels of a paged tree, 0 while inline.
    pub fn height(&self) -> u32 {
        match self.storage {
            TreeStorage::Inline { .. } => 0,
            TreeStorage::Paged { height, .. } => height,
        }
    }

    // =========================================================================
    // Page access
    // =========================================================================

    fn read_leaf(&self, page_id: PageId) -> Result<LeafPage> {
        LeafPage::from_bytes(page_id, &*self.store.read_page(page_id)?)
    }

    fn read_node(&self, page_id: PageId) -> Result<NodePage> {
        NodePage::from_bytes(page_id, &*self.store.read_page(page_id)?)
    }

    fn write_leaf(&self, leaf: &LeafPage) -> Result<()> {
        self.store.write_page(leaf.page_id, &*leaf.to_bytes()?)
    }

    fn write_node(&self, node: &NodePage) -> Result<()> {
        self.store.write_page(node.page_id, &*node.to_bytes()?)
    }

    /// Walks from the root to the leaf whose range holds `target`.
    fn descend(&self, root: PageId, height: u32, target: &IndexEntry) -> Result<(Path, LeafPage)> {
        let mut path = Vec::with_capacity(height as usize);
        let mut page_id = root;
        for level in (1..height).rev() {
            let node = self.read_node(page_id)?;
            if node.level as u32 != level {
                return Err(TesseraError::corrupted(
                    page_id.0,
                    format!("node at level {} found where level {} expected", node.level, level),
                ));
            }
            let index = node.route(target);
            page_id = node.child(index);
            path.push((node, index));
        }
        Ok((path, self.read_leaf(page_id)?))
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Inserts an entry. Returns false if it was already present.
    pub fn insert(&mut self, entry: IndexEntry) -> Result<bool> {
        if entry.key.len() > MAX_INDEX_KEY_SIZE {
            return Err(TesseraError::KeyTooLarge {
                size: entry.key.len(),
                max: MAX_INDEX_KEY_SIZE,
            });
        }
        if !entry.row_id.is_valid() {
            return Err(TesseraError::InvalidArgument(format!(
                "cannot store entry for {}",
                entry.row_id
            )));
        }

        match &mut self.storage {
            TreeStorage::Inline { entries, bytes } => {
                let Err(index) = entries.binary_search(&entry) else {
                    return Ok(false);
                };
                *bytes += entry.size();
                let undo = (*bytes > self.inline_threshold).then(|| entry.clone());
                entries.insert(index, entry);
                if let Some(undo) = undo {
                    if let Err(e) = self.promote() {
                        // Promotion left the inline entries in place; drop the
                        // new one so a failed insert changes nothing.
                        self.delete(&undo)?;
                        return Err(e);
                    }
                }
                Ok(true)
            }
            TreeStorage::Paged { root, height } => {
                let (root, height) = (*root, *height);
                self.insert_paged(root, height, entry)
            }
        }
    }

    /// Moves inline entries into a freshly built page tree.
    ///
    /// The tree is built bottom-up beside the inline storage and installed
    /// only once every page is written. On failure the new pages are freed
    /// and the entries stay inline.
    fn promote(&mut self) -> Result<()> {
        let TreeStorage::Inline { entries, bytes } = &self.storage else {
            return Ok(());
        };
        let (count, bytes) = (entries.len(), *bytes);
        let mut allocated = Vec::new();
        match self.build_pages(entries, &mut allocated) {
            Ok((root, height)) => {
                debug!(entries = count, bytes, root = %root, height, "promoted inline index to pages");
                self.storage = TreeStorage::Paged { root, height };
                Ok(())
            }
            Err(e) => {
                warn!(entries = count, pages = allocated.len(), error = %e, "index promotion failed");
                for page_id in allocated {
                    if let Err(free_err) = self.store.free_page(page_id) {
                        warn!(page = %page_id, error = %free_err, "could not free page of failed promotion");
                    }
                }
                Err(e)
            }
        }
    }

    /// Bulk loads sorted `entries` into new pages, recording every page
    /// it allocates. Returns the root and height.
    fn build_pages(&self, entries: &[IndexEntry], allocated: &mut Vec<PageId>) -> Result<(PageId, u32)> {
        let mut leaves = Vec::new();
        let mut current = LeafPage::new(PageId(0));
        for entry in entries {
            current.entries.push(entry.clone());
            if !current.fits() && current.entries.len() > 1 {
                if let Some(overflow) = current.entries.pop() {
                    leaves.push(std::mem::replace(&mut current, LeafPage::new(PageId(0))));
                    current.entries.push(overflow);
                }
            }
        }
        leaves.push(current);

        for leaf in &mut leaves {
            leaf.page_id = self.store.allocate_page()?;
            allocated.push(leaf.page_id);
        }
        let ids: Vec<PageId> = leaves.iter().map(|leaf| leaf.page_id).collect();
        let single = leaves.len() == 1;
        for (i, leaf) in leaves.iter_mut().enumerate() {
            leaf.prev = i.checked_sub(1).map(|j| ids[j]);
            leaf.next = ids.get(i + 1).copied();
            leaf.root = single;
            self.write_leaf(leaf)?;
        }

        // Each item carries the smallest entry below its page; the first
        // item's entry is never stored as a separator.
        let mut items: Vec<(IndexEntry, PageId)> = leaves
            .iter()
            .filter_map(|leaf| leaf.entries.first().map(|first| (first.clone(), leaf.page_id)))
            .collect();
        let mut height = 1;
        while items.len() > 1 {
            if height >= MAX_HEIGHT {
                return Err(TesseraError::Internal(format!("index tree exceeds height {}", MAX_HEIGHT)));
            }
            let mut nodes: Vec<(IndexEntry, NodePage)> = Vec::new();
            for (separator, child) in items {
                if let Some((_, node)) = nodes.last_mut() {
                    node.children.push((separator.clone(), child));
                    if node.fits() {
                        continue;
                    }
                    node.children.pop();
                }
                nodes.push((separator, NodePage::new(PageId(0), height as u16, child)));
            }

            let single = nodes.len() == 1;
            items = Vec::with_capacity(nodes.len());
            for (separator, mut node) in nodes {
                node.page_id = self.store.allocate_page()?;
                allocated.push(node.page_id);
                node.root = single;
                self.write_node(&node)?;
                items.push((separator, node.page_id));
            }
            height += 1;
        }
        let root = match items.first() {
            Some((_, page_id)) => *page_id,
            None => ids
                .first()
                .copied()
                .ok_or_else(|| TesseraError::Internal("bulk load built no pages".to_string()))?,
        };
        Ok((root, height))
    }

    fn paged_root(&self) -> Result<(PageId, u32)> {
        match self.storage {
            TreeStorage::Paged { root, height } => Ok((root, height)),
            TreeStorage::Inline { .. } => {
                Err(TesseraError::Internal("page operation on inline tree".to_string()))
            }
        }
    }

    fn insert_paged(&mut self, root: PageId, height: u32, entry: IndexEntry) -> Result<bool> {
        let (path, mut leaf) = self.descend(root, height, &entry)?;
        let Err(index) = leaf.search(&entry) else {
            return Ok(false);
        };
        leaf.entries.insert(index, entry);
        if leaf.fits() {
            self.write_leaf(&leaf)?;
            return Ok(true);
        }

        let (separator, right) = self.split_leaf(leaf)?;
        self.propagate_split(path, separator, right)?;
        Ok(true)
    }

    /// Splits an overfull leaf by bytes. Returns the right half's first
    /// entry and page.
    fn split_leaf(&mut self, mut leaf: LeafPage) -> Result<(IndexEntry, PageId)> {
        let sizes = entry_sizes(leaf.entries.iter(), 0);
        let total = sizes.iter().sum();
        let at = split_point(sizes.into_iter(), total, leaf.entries.len());

        let right_id = self.store.allocate_page()?;
        let mut right = LeafPage::new(right_id);
        right.entries = leaf.entries.split_off(at);
        right.prev = Some(leaf.page_id);
        right.next = leaf.next;

        if let Some(next_id) = leaf.next {
            let mut next = self.read_leaf(next_id)?;
            next.prev = Some(right_id);
            self.write_leaf(&next)?;
        }
        leaf.next = Some(right_id);
        leaf.root = false;

        self.write_leaf(&right)?;
        self.write_leaf(&leaf)?;
        debug!(
            left = %leaf.page_id,
            right = %right_id,
            left_entries = leaf.entries.len(),
            right_entries = right.entries.len(),
            "split index leaf"
        );

        let separator = right.entries.swap_remove(0);
        Ok((separator, right_id))
    }

    /// Splits an overfull node. The middle separator moves up.
    fn split_node(&mut self, mut node: NodePage) -> Result<(IndexEntry, PageId)> {
        let sizes = entry_sizes(node.children.iter().map(|(e, _)| e), CHILD_REF_SIZE);
        let total = sizes.iter().sum();
        let at = split_point(sizes.into_iter(), total, node.children.len());

        let mut tail = node.children.split_off(at);
        let (separator, right_leftmost) = tail.remove(0);
        let right_id = self.store.allocate_page()?;
        let mut right = NodePage::new(right_id, node.level, right_leftmost);
        right.children = tail;
        node.root = false;

        self.write_node(&right)?;
        self.write_node(&node)?;
        debug!(
            left = %node.page_id,
            right = %right_id,
            level = node.level,
            "split index node"
        );
        Ok((separator, right_id))
    }

    /// Hands a new separator to each ancestor in turn, splitting as needed.
    fn propagate_split(&mut self, mut path: Path, separator: IndexEntry, child: PageId) -> Result<()> {
        let mut pending = (separator, child);
        while let Some((mut node, index)) = path.pop() {
            let (separator, child) = pending;
            node.insert_child(index, separator, child);
            if node.fits() {
                return self.write_node(&node);
            }
            pending = self.split_node(node)?;
        }
        self.grow_root(pending.0, pending.1)
    }

    fn grow_root(&mut self, separator: IndexEntry, right: PageId) -> Result<()> {
        let (root, height) = self.paged_root()?;
        if height >= MAX_HEIGHT {
            return Err(TesseraError::Internal(format!("index tree exceeds height {}", MAX_HEIGHT)));
        }

        let new_root_id = self.store.allocate_page()?;
        let mut new_root = NodePage::new(new_root_id, height as u16, root);
        new_root.insert_child(0, separator, right);
        new_root.root = true;
        self.write_node(&new_root)?;

        self.storage = TreeStorage::Paged {
            root: new_root_id,
            height: height + 1,
        };
        debug!(root = %new_root_id, height = height + 1, "index tree grew");
        Ok(())
    }

    /// Removes an entry. Returns false if it was not present.
    pub fn delete(&mut self, entry: &IndexEntry) -> Result<bool> {
        match &mut self.storage {
            TreeStorage::Inline { entries, bytes } => match entries.binary_search(entry) {
                Ok(index) => {
                    let removed = entries.remove(index);
                    *bytes -= removed.size();
                    Ok(true)
                }
                Err(_) => Ok(false),
            },
            TreeStorage::Paged { root, height } => {
                let (root, height) = (*root, *height);
                self.delete_paged(root, height, entry)
            }
        }
    }

    fn delete_paged(&mut self, root: PageId, height: u32, entry: &IndexEntry) -> Result<bool> {
        let (path, mut leaf) = self.descend(root, height, entry)?;
        let Ok(index) = leaf.search(entry) else {
            return Ok(false);
        };
        leaf.entries.remove(index);

        if !leaf.entries.is_empty() || path.is_empty() {
            self.write_leaf(&leaf)?;
            return Ok(true);
        }

        self.unlink_leaf(&leaf)?;
        self.remove_from_parents(path)?;
        self.collapse_root()?;
        Ok(true)
    }

    /// Detaches an empty leaf from its neighbors and frees it.
    fn unlink_leaf(&mut self, leaf: &LeafPage) -> Result<()> {
        if let Some(prev_id) = leaf.prev {
            let mut prev = self.read_leaf(prev_id)?;
            prev.next = leaf.next;
            self.write_leaf(&prev)?;
        }
        if let Some(next_id) = leaf.next {
            let mut next = self.read_leaf(next_id)?;
            next.prev = leaf.prev;
            self.write_leaf(&next)?;
        }
        self.store.free_page(leaf.page_id)?;
        debug!(page = %leaf.page_id, "unlinked empty index leaf");
        Ok(())
    }

    /// Drops the reference to a freed child, freeing ancestors left empty.
    fn remove_from_parents(&mut self, mut path: Path) -> Result<()> {
        while let Some((mut node, index)) = path.pop() {
            if node.remove_child(index) {
                return self.write_node(&node);
            }
            self.store.free_page(node.page_id)?;
            if path.is_empty() {
                // The root itself emptied: start over with an empty root leaf.
                let root_id = self.store.allocate_page()?;
                let mut root = LeafPage::new(root_id);
                root.root = true;
                self.write_leaf(&root)?;
                self.storage = TreeStorage::Paged {
                    root: root_id,
                    height: 1,
                };
                return Ok(());
            }
        }
        Ok(())
    }

    /// Replaces a root node that has a single child with that child.
    fn collapse_root(&mut self) -> Result<()> {
        while let TreeStorage::Paged { root, height } = self.storage {
            if height <= 1 {
                break;
            }
            let node = self.read_node(root)?;
            if !node.children.is_empty() {
                break;
            }

            let child = node.leftmost;
            if height == 2 {
                let mut leaf = self.read_leaf(child)?;
                leaf.root = true;
                self.write_leaf(&leaf)?;
            } else {
                let mut next = self.read_node(child)?;
                next.root = true;
                self.write_node(&next)?;
            }
            self.store.free_page(root)?;
            self.storage = TreeStorage::Paged {
                root: child,
                height: height - 1,
            };
            debug!(root = %child, height = height - 1, "index tree root collapsed");
        }
        Ok(())
    }

    // =========================================================================
    // Search and traversal
    // =========================================================================

    /// Returns true if the exact entry is present.
    pub fn contains(&self, entry: &IndexEntry) -> Result<bool> {
        Ok(self.seek(entry, Direction::Next, true)?.as_ref() == Some(entry))
    }

    /// Finds the nearest entry at or beyond `target` in `direction`: the
    /// first entry `>= target` going next, the last entry `<= target` going
    /// previous. Returns the end boundary when there is none.
    pub fn find(&self, target: &IndexEntry, direction: Direction) -> Result<EntryPosition> {
        Ok(match self.seek(target, direction, true)? {
            Some(entry) => EntryPosition::At(entry),
            None => EntryPosition::end_of(direction),
        })
    }

    /// Moves one entry from `from` in `direction`.
    ///
    /// `from` need not be present in the tree; the result is the nearest
    /// entry strictly beyond it.
    pub fn step(&self, from: &EntryPosition, direction: Direction) -> Result<EntryPosition> {
        let found = match (from, direction) {
            (EntryPosition::BeforeFirst, Direction::Next)
            | (EntryPosition::AfterLast, Direction::Previous) => self.edge(direction)?,
            (EntryPosition::BeforeFirst, Direction::Previous) => None,
            (EntryPosition::AfterLast, Direction::Next) => None,
            (EntryPosition::At(entry), _) => self.seek(entry, direction, false)?,
        };
        Ok(match found {
            Some(entry) => EntryPosition::At(entry),
            None => EntryPosition::end_of(direction),
        })
    }

    /// Lazily iterates entries beyond `from` in `direction`.
    pub fn iterate(&self, from: EntryPosition, direction: Direction) -> EntryIter<'_> {
        EntryIter {
            tree: self,
            position: from,
            direction,
            done: false,
        }
    }

    /// First entry going `direction` from the matching boundary.
    fn edge(&self, direction: Direction) -> Result<Option<IndexEntry>> {
        let (root, height) = match &self.storage {
            TreeStorage::Inline { entries, .. } => {
                return Ok(match direction {
                    Direction::Next => entries.first().cloned(),
                    Direction::Previous => entries.last().cloned(),
                });
            }
            TreeStorage::Paged { root, height } => (*root, *height),
        };

        let mut page_id = root;
        for _ in 1..height {
            let node = self.read_node(page_id)?;
            page_id = match direction {
                Direction::Next => node.leftmost,
                Direction::Previous => node.child(node.child_count() - 1),
            };
        }
        let leaf = self.read_leaf(page_id)?;
        self.scan_from_leaf(leaf, direction)
    }

    /// First entry of `leaf` (or of the leaves past it) in `direction`.
    fn scan_from_leaf(&self, mut leaf: LeafPage, direction: Direction) -> Result<Option<IndexEntry>> {
        for _ in 0..=self.store.num_pages() {
            let found = match direction {
                Direction::Next => leaf.entries.first(),
                Direction::Previous => leaf.entries.last(),
            };
            if let Some(entry) = found {
                return Ok(Some(entry.clone()));
            }
            let link = match direction {
                Direction::Next => leaf.next,
                Direction::Previous => leaf.prev,
            };
            match link {
                Some(page_id) => leaf = self.read_leaf(page_id)?,
                None => return Ok(None),
            }
        }
        Err(TesseraError::corrupted(leaf.page_id.0, "leaf chain cycles"))
    }

    /// Nearest entry past `target` in `direction`, including `target`
    /// itself when `inclusive`.
    fn seek(&self, target: &IndexEntry, direction: Direction, inclusive: bool) -> Result<Option<IndexEntry>> {
        let before_target = |e: &IndexEntry| match (direction, inclusive) {
            (Direction::Next, true) | (Direction::Previous, false) => e < target,
            (Direction::Next, false) | (Direction::Previous, true) => e <= target,
        };

        let (root, height) = match &self.storage {
            TreeStorage::Inline { entries, .. } => {
                let index = entries.partition_point(before_target);
                return Ok(match direction {
                    Direction::Next => entries.get(index).cloned(),
                    Direction::Previous => index.checked_sub(1).map(|i| entries[i].clone()),
                });
            }
            TreeStorage::Paged { root, height } => (*root, *height),
        };

        let (_, mut leaf) = self.descend(root, height, target)?;
        let index = leaf.entries.partition_point(before_target);
        match direction {
            Direction::Next => {
                if index < leaf.entries.len() {
                    return Ok(Some(leaf.entries.swap_remove(index)));
                }
                match leaf.next {
                    Some(next) => self.scan_from_leaf(self.read_leaf(next)?, direction),
                    None => Ok(None),
                }
            }
            Direction::Previous => {
                if index > 0 {
                    return Ok(Some(leaf.entries.swap_remove(index - 1)));
                }
                match leaf.prev {
                    Some(prev) => self.scan_from_leaf(self.read_leaf(prev)?, direction),
                    None => Ok(None),
                }
            }
        }
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Checks ordering, bounds and leaf linkage. Returns the entry count.
    pub fn validate(&self) -> Result<u64> {
        let (root, height) = match &self.storage {
            TreeStorage::Inline { entries, bytes } => {
                if let Some(i) = (1..entries.len()).find(|&i| entries[i - 1] >= entries[i]) {
                    return Err(TesseraError::ValidationFailed(format!(
                        "inline entries {} and {} out of order",
                        i - 1,
                        i
                    )));
                }
                let actual: usize = entries.iter().map(IndexEntry::size).sum();
                if actual != *bytes {
                    return Err(TesseraError::ValidationFailed(format!(
                        "inline byte count {} but entries hold {}",
                        bytes, actual
                    )));
                }
                return Ok(entries.len() as u64);
            }
            TreeStorage::Paged { root, height } => (*root, *height),
        };

        let mut leaves = Vec::new();
        let count = self.validate_subtree(root, height - 1, None, None, true, &mut leaves)?;

        for (i, (page_id, prev, next)) in leaves.iter().enumerate() {
            let expected_prev = i.checked_sub(1).map(|j| leaves[j].0);
            let expected_next = leaves.get(i + 1).map(|l| l.0);
            if *prev != expected_prev || *next != expected_next {
                return Err(TesseraError::ValidationFailed(format!(
                    "leaf {} links ({:?}, {:?}), expected ({:?}, {:?})",
                    page_id, prev, next, expected_prev, expected_next
                )));
            }
        }
        Ok(count)
    }

    fn validate_subtree(
        &self,
        page_id: PageId,
        level: u32,
        low: Option<&IndexEntry>,
        high: Option<&IndexEntry>,
        is_root: bool,
        leaves: &mut Vec<LeafLinks>,
    ) -> Result<u64> {
        let fail = |what: String| Err(TesseraError::ValidationFailed(format!("{}: {}", page_id, what)));
        let in_bounds = |e: &IndexEntry| low.is_none_or(|l| e >= l) && high.is_none_or(|h| e < h);

        if level == 0 {
            let leaf = self.read_leaf(page_id)?;
            if leaf.root != is_root {
                return fail(format!("root flag {} on leaf", leaf.root));
            }
            if !is_root && leaf.entries.is_empty() {
                return fail("empty non-root leaf".to_string());
            }
            if let Some(i) = (1..leaf.entries.len()).find(|&i| leaf.entries[i - 1] >= leaf.entries[i]) {
                return fail(format!("entries {} and {} out of order", i - 1, i));
            }
            if let Some(e) = leaf.entries.iter().find(|&e| !in_bounds(e)) {
                return fail(format!("entry {:?} outside parent bounds", e));
            }
            leaves.push((page_id, leaf.prev, leaf.next));
            return Ok(leaf.entries.len() as u64);
        }

        let node = self.read_node(page_id)?;
        if node.level as u32 != level {
            return fail(format!("level {} where {} expected", node.level, level));
        }
        if node.root != is_root {
            return fail(format!("root flag {} on node", node.root));
        }
        if is_root && node.children.is_empty() {
            return fail("root node with a single child".to_string());
        }
        if let Some(i) = (1..node.children.len())
            .find(|&i| node.children[i - 1].0 >= node.children[i].0)
        {
            return fail(format!("separators {} and {} out of order", i - 1, i));
        }
        if let Some((e, _)) = node.children.iter().find(|(e, _)| !in_bounds(e)) {
            return fail(format!("separator {:?} outside parent bounds", e));
        }

        let first_high = node.children.first().map(|(e, _)| e).or(high);
        let mut count = self.validate_subtree(node.leftmost, level - 1, low, first_high, false, leaves)?;
        for (i, (separator, child)) in node.children.iter().enumerate() {
            let child_high = node.children.get(i + 1).map(|(e, _)| e).or(high);
            count += self.validate_subtree(*child, level - 1, Some(separator), child_high, false, leaves)?;
        }
        Ok(count)
    }
}

/// Lazy entry iterator over an [`IndexPageTree`].
pub struct EntryIter<'a> {
    tree: &'a IndexPageTree,
    position: EntryPosition,
    direction: Direction,
    done: bool,
}

impl EntryIter<'_> {
    /// Position of the last entry yielded (or the start position).
    pub fn position(&self) -> &EntryPosition {
        &self.position
    }
}

impl Iterator for EntryIter<'_> {
    type Item = Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.tree.step(&self.position, self.direction) {
            Ok(EntryPosition::At(entry)) => {
                self.position = EntryPosition::At(entry.clone());
                Some(Ok(entry))
            }
            Ok(end) => {
                self.position = end;
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::RowId;
    use crate::store::MemoryPageStore;

    fn rid(n: u32) -> RowId {
        RowId::new(PageId(n / 100), (n % 100) as u16)
    }

    fn key(n: u32) -> Vec<u8> {
        let mut k = format!("key-{:08}-", n).into_bytes();
        k.resize(48, b'x');
        k
    }

    fn entry(n: u32) -> IndexEntry {
        IndexEntry::new(key(n), rid(n))
    }

    fn collect(tree: &IndexPageTree, direction: Direction) -> Vec<IndexEntry> {
        tree.iterate(EntryPosition::start_of(direction), direction)
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    fn paged_tree(store: &Arc<MemoryPageStore>) -> IndexPageTree {
        IndexPageTree::new(store.clone(), 0)
    }

    #[test]
    fn test_inline_insert_and_iterate() {
        let store = Arc::new(MemoryPageStore::new());
        let mut tree = IndexPageTree::new(store.clone(), 1024);
        for n in [5, 1, 3] {
            assert!(tree.insert(entry(n)).unwrap());
        }
        assert!(!tree.insert(entry(3)).unwrap());
        assert_eq!(tree.storage_kind(), StorageKind::Inline);
        assert_eq!(store.used_pages(), 0);

        let forward: Vec<IndexEntry> = collect(&tree, Direction::Next);
        assert_eq!(forward, vec![entry(1), entry(3), entry(5)]);
        let mut backward = collect(&tree, Direction::Previous);
        backward.reverse();
        assert_eq!(backward, forward);
        assert_eq!(tree.validate().unwrap(), 3);
    }

    #[test]
    fn test_promotion_keeps_order() {
        let store = Arc::new(MemoryPageStore::new());
        let mut tree = IndexPageTree::new(store.clone(), 1024);
        let mut inserted = Vec::new();
        for n in (0..60).rev() {
            tree.insert(entry(n)).unwrap();
            inserted.push(entry(n));
        }
        assert_eq!(tree.storage_kind(), StorageKind::Paged);
        inserted.sort();
        assert_eq!(collect(&tree, Direction::Next), inserted);
        assert_eq!(tree.validate().unwrap(), 60);

        // Deleting everything does not move the tree back inline.
        for e in &inserted {
            assert!(tree.delete(e).unwrap());
        }
        assert_eq!(tree.storage_kind(), StorageKind::Paged);
        assert!(collect(&tree, Direction::Next).is_empty());
    }

    /// Memory store whose writes start failing after a fixed number.
    struct FailingStore {
        inner: MemoryPageStore,
        writes_left: std::sync::atomic::AtomicUsize,
    }

    impl FailingStore {
        fn new(writes: usize) -> Self {
            Self {
                inner: MemoryPageStore::new(),
                writes_left: std::sync::atomic::AtomicUsize::new(writes),
            }
        }
    }

    impl PageStore for FailingStore {
        fn read_page(&self, page_id: PageId) -> Result<tessera_common::PageBuf> {
            self.inner.read_page(page_id)
        }

        fn write_page(&self, page_id: PageId, data: &[u8; tessera_common::PAGE_SIZE]) -> Result<()> {
            use std::sync::atomic::Ordering;
            let left = self.writes_left.load(Ordering::SeqCst);
            if left == 0 {
                return Err(TesseraError::Internal("write refused".to_string()));
            }
            self.writes_left.store(left - 1, Ordering::SeqCst);
            self.inner.write_page(page_id, data)
        }

        fn allocate_page(&self) -> Result<PageId> {
            self.inner.allocate_page()
        }

        fn free_page(&self, page_id: PageId) -> Result<()> {
            self.inner.free_page(page_id)
        }

        fn num_pages(&self) -> u32 {
            self.inner.num_pages()
        }

        fn flush(&self) -> Result<()> {
            self.inner.flush()
        }

        fn enter_batch(&self) {
            self.inner.enter_batch()
        }

        fn exit_batch(&self) -> Result<()> {
            self.inner.exit_batch()
        }
    }

    #[test]
    fn test_failed_promotion_stays_inline() {
        let store = Arc::new(FailingStore::new(0));
        let mut tree = IndexPageTree::new(store.clone(), 1024);
        let mut accepted = Vec::new();
        let mut failed = None;
        for n in 0..60 {
            match tree.insert(entry(n)) {
                Ok(added) => {
                    assert!(added);
                    accepted.push(entry(n));
                }
                Err(_) => {
                    failed = Some(n);
                    break;
                }
            }
        }
        let failed = failed.unwrap();
        assert!(!accepted.is_empty());
        assert_eq!(tree.storage_kind(), StorageKind::Inline);
        assert_eq!(collect(&tree, Direction::Next), accepted);
        assert_eq!(tree.validate().unwrap(), accepted.len() as u64);
        assert_eq!(store.inner.used_pages(), 0);

        // Once writes succeed again the same insert promotes cleanly.
        store.writes_left.store(usize::MAX, std::sync::atomic::Ordering::SeqCst);
        assert!(tree.insert(entry(failed)).unwrap());
        accepted.push(entry(failed));
        assert_eq!(tree.storage_kind(), StorageKind::Paged);
        assert_eq!(collect(&tree, Direction::Next), accepted);
        assert_eq!(tree.validate().unwrap(), accepted.len() as u64);
    }

    #[test]
    fn test_bulk_promotion_builds_levels() {
        let store = Arc::new(MemoryPageStore::new());
        let mut tree = IndexPageTree::new(store.clone(), 1 << 20);
        for n in 0..3000 {
            tree.insert(entry(n)).unwrap();
        }
        assert_eq!(tree.storage_kind(), StorageKind::Inline);
        tree.inline_threshold = 0;
        assert!(tree.insert(entry(3000)).unwrap());
        assert_eq!(tree.storage_kind(), StorageKind::Paged);
        assert!(tree.height() >= 2);
        assert_eq!(tree.validate().unwrap(), 3001);

        for n in (0..3001).step_by(3) {
            assert!(tree.delete(&entry(n)).unwrap());
        }
        assert_eq!(tree.validate().unwrap(), 2000);
    }

    #[test]
    fn test_splits_grow_height() {
        let store = Arc::new(MemoryPageStore::new());
        let mut tree = paged_tree(&store);
        for n in 0..3000 {
            // Interleave to exercise middle inserts.
            let n = (n * 7919) % 3000;
            assert!(tree.insert(entry(n)).unwrap());
        }
        assert!(tree.height() >= 2);
        assert_eq!(tree.validate().unwrap(), 3000);

        let forward = collect(&tree, Direction::Next);
        assert_eq!(forward.len(), 3000);
        assert!(forward.windows(2).all(|w| w[0] < w[1]));

        let mut backward = collect(&tree, Direction::Previous);
        backward.reverse();
        assert_eq!(backward, forward);
    }

    #[test]
    fn test_delete_unlinks_and_collapses() {
        let store = Arc::new(MemoryPageStore::new());
        let mut tree = paged_tree(&store);
        for n in 0..2000 {
            tree.insert(entry(n)).unwrap();
        }
        let grown_pages = store.used_pages();
        assert!(grown_pages > 10);

        for n in 0..1990 {
            assert!(tree.delete(&entry(n)).unwrap());
            if n % 250 == 0 {
                tree.validate().unwrap();
            }
        }
        assert!(!tree.delete(&entry(0)).unwrap());
        assert_eq!(tree.validate().unwrap(), 10);
        assert!(store.used_pages() < grown_pages);
        assert_eq!(tree.height(), 1);
        assert_eq!(
            collect(&tree, Direction::Next),
            (1990..2000).map(entry).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_step_from_deleted_position() {
        let store = Arc::new(MemoryPageStore::new());
        let mut tree = paged_tree(&store);
        for n in 0..500 {
            tree.insert(entry(n)).unwrap();
        }
        let gone = EntryPosition::At(entry(250));
        tree.delete(&entry(250)).unwrap();

        assert_eq!(
            tree.step(&gone, Direction::Next).unwrap(),
            EntryPosition::At(entry(251))
        );
        assert_eq!(
            tree.step(&gone, Direction::Previous).unwrap(),
            EntryPosition::At(entry(249))
        );
    }

    #[test]
    fn test_find_with_sentinel_bounds() {
        let store = Arc::new(MemoryPageStore::new());
        for threshold in [1024, 0] {
            let mut tree = IndexPageTree::new(store.clone(), threshold);
            for slot in 0..4u16 {
                tree.insert(IndexEntry::new(b"b".to_vec(), RowId::new(PageId(1), slot)))
                    .unwrap();
            }
            tree.insert(IndexEntry::new(b"a".to_vec(), RowId::new(PageId(9), 0))).unwrap();
            tree.insert(IndexEntry::new(b"c".to_vec(), RowId::new(PageId(0), 0))).unwrap();

            let lo = IndexEntry::new(b"b".to_vec(), RowId::First);
            let hi = IndexEntry::new(b"b".to_vec(), RowId::Last);
            assert_eq!(
                tree.find(&lo, Direction::Next).unwrap(),
                EntryPosition::At(IndexEntry::new(b"b".to_vec(), RowId::new(PageId(1), 0)))
            );
            assert_eq!(
                tree.find(&hi, Direction::Previous).unwrap(),
                EntryPosition::At(IndexEntry::new(b"b".to_vec(), RowId::new(PageId(1), 3)))
            );

            let past = IndexEntry::new(b"d".to_vec(), RowId::First);
            assert_eq!(tree.find(&past, Direction::Next).unwrap(), EntryPosition::AfterLast);
            let before = IndexEntry::new(b"".to_vec(), RowId::First);
            assert_eq!(tree.find(&before, Direction::Previous).unwrap(), EntryPosition::BeforeFirst);

            assert_eq!(
                tree.step(&EntryPosition::AfterLast, Direction::Next).unwrap(),
                EntryPosition::AfterLast
            );
            assert_eq!(
                tree.step(&EntryPosition::BeforeFirst, Direction::Previous).unwrap(),
                EntryPosition::BeforeFirst
            );
        }
    }

    #[test]
    fn test_iterate_is_restartable() {
        let store = Arc::new(MemoryPageStore::new());
        let mut tree = paged_tree(&store);
        for n in 0..300 {
            tree.insert(entry(n)).unwrap();
        }
        let mut iter = tree.iterate(EntryPosition::BeforeFirst, Direction::Next);
        for _ in 0..100 {
            iter.next().unwrap().unwrap();
        }
        let resume = iter.position().clone();
        assert_eq!(resume, EntryPosition::At(entry(99)));

        let rest: Vec<IndexEntry> = tree
            .iterate(resume, Direction::Next)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(rest.first(), Some(&entry(100)));
        assert_eq!(rest.len(), 200);
    }

    #[test]
    fn test_reopen_from_root() {
        let store = Arc::new(MemoryPageStore::new());
        let mut tree = paged_tree(&store);
        for n in 0..800 {
            tree.insert(entry(n)).unwrap();
        }
        let root = tree.root();
        let json = serde_json::to_string(&root).unwrap();
        let root: TreeRoot = serde_json::from_str(&json).unwrap();

        let reopened = IndexPageTree::open(store.clone(), root, 0).unwrap();
        assert_eq!(reopened.validate().unwrap(), 800);
        assert_eq!(collect(&reopened, Direction::Next), collect(&tree, Direction::Next));

        let inline = IndexPageTree::open(
            store.clone(),
            TreeRoot::Inline(vec![entry(2), entry(1)]),
            1024,
        )
        .unwrap();
        assert_eq!(collect(&inline, Direction::Next), vec![entry(1), entry(2)]);
    }

    #[test]
    fn test_validate_detects_broken_links() {
        let store = Arc::new(MemoryPageStore::new());
        let mut tree = paged_tree(&store);
        for n in 0..400 {
            tree.insert(entry(n)).unwrap();
        }
        let TreeRoot::Paged { root, height } = tree.root() else {
            panic!("tree should be paged");
        };
        assert!(height >= 2);

        let node = NodePage::from_bytes(root, &store.read_page(root).unwrap()).unwrap();
        let mut leaf = LeafPage::from_bytes(node.leftmost, &store.read_page(node.leftmost).unwrap())
            .unwrap();
        leaf.next = None;
        store.write_page(leaf.page_id, &leaf.to_bytes().unwrap()).unwrap();

        assert!(matches!(tree.validate(), Err(TesseraError::ValidationFailed(_))));
    }

    #[test]
    fn test_corrupt_page_surfaces_structural_error() {
        let store = Arc::new(MemoryPageStore::new());
        let mut tree = paged_tree(&store);
        tree.insert(entry(1)).unwrap();
        let TreeRoot::Paged { root, .. } = tree.root() else {
            panic!("tree should be paged");
        };
        let mut page = store.read_page(root).unwrap();
        page[0] = 0xEE;
        store.write_page(root, &page).unwrap();

        let err = tree.find(&entry(1), Direction::Next).unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn test_rejects_oversized_and_sentinel_entries() {
        let store = Arc::new(MemoryPageStore::new());
        let mut tree = paged_tree(&store);
        let big = IndexEntry::new(vec![1u8; MAX_INDEX_KEY_SIZE + 1], rid(1));
        assert!(matches!(tree.insert(big), Err(TesseraError::KeyTooLarge { .. })));
        let sentinel = IndexEntry::new(b"k".to_vec(), RowId::Last);
        assert!(tree.insert(sentinel).is_err());
    }

    #[test]
    fn test_max_size_keys_split() {
        let store = Arc::new(MemoryPageStore::new());
        let mut tree = paged_tree(&store);
        for n in 0..40u32 {
            let mut k = vec![(n % 251) as u8; MAX_INDEX_KEY_SIZE];
            k[MAX_INDEX_KEY_SIZE - 1] = (n / 251) as u8;
            tree.insert(IndexEntry::new(k, rid(n))).unwrap();
        }
        assert_eq!(tree.validate().unwrap(), 40);
    }
}
