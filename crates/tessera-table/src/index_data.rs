//! Physical index data shared by one or more logical indexes.
//!
//! Row mutations reach an index in two phases. `prepare_*` encodes the
//! entry and checks uniqueness without touching the tree; the returned
//! [`PendingChange`] applies the mutation on `commit` and undoes it on
//! `revert`. A table gathers one change per index into [`PendingChanges`]
//! so a row either lands in every index or in none.

use crate::schema::IndexDef;
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_common::{Result, TesseraError, Value};
use tessera_storage::{
    Direction, EntryCodec, EntryPosition, IndexEntry, IndexPageTree, RowId, StorageKind, TreeRoot,
};
use tracing::debug;

static NEXT_INDEX_DATA_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct EntryCounts {
    entries: u64,
    unique: u64,
}

/// Entries of one physical index plus their counts.
pub struct IndexData {
    id: u64,
    codec: EntryCodec,
    /// Table column position of each key column.
    positions: Vec<usize>,
    unique: bool,
    ignore_nulls: bool,
    /// Logical index that owns physical mutation.
    primary: String,
    /// Logical indexes reading through this data.
    views: Vec<String>,
    tree: IndexPageTree,
    /// None until the first full scan of a reopened index.
    counts: Option<EntryCounts>,
}

impl IndexData {
    /// Creates index data for a new, empty index.
    pub(crate) fn create(def: &IndexDef, codec: EntryCodec, positions: Vec<usize>, tree: IndexPageTree) -> Self {
        let mut data = Self::attach(def, codec, positions, tree);
        data.counts = Some(EntryCounts::default());
        data
    }

    /// Attaches to an existing tree. Counts are computed on [`IndexData::initialize`].
    pub(crate) fn attach(def: &IndexDef, codec: EntryCodec, positions: Vec<usize>, tree: IndexPageTree) -> Self {
        Self {
            id: NEXT_INDEX_DATA_ID.fetch_add(1, Ordering::Relaxed),
            codec,
            positions,
            unique: def.unique,
            ignore_nulls: def.ignore_nulls,
            primary: def.name.clone(),
            views: Vec::new(),
            tree,
            counts: None,
        }
    }

    /// Process-unique identity of this index data.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the logical index that owns this data.
    pub fn primary_name(&self) -> &str {
        &self.primary
    }

    /// Every logical index served by this data, primary first.
    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.views.iter().map(String::as_str))
    }

    pub(crate) fn add_view(&mut self, name: &str) {
        self.views.push(name.to_string());
    }

    pub fn codec(&self) -> &EntryCodec {
        &self.codec
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn ignores_nulls(&self) -> bool {
        self.ignore_nulls
    }

    /// Whether entries are held inline or in pages.
    pub fn storage_kind(&self) -> StorageKind {
        self.tree.storage_kind()
    }

    /// Root descriptor for persisting the tree.
    pub fn root(&self) -> TreeRoot {
        self.tree.root()
    }

    pub(crate) fn tree(&self) -> &IndexPageTree {
        &self.tree
    }

    /// Picks the key column values out of a full table row.
    pub fn key_values(&self, row: &[Value]) -> Result<Vec<Value>> {
        self.positions
            .iter()
            .map(|&pos| {
                row.get(pos).cloned().ok_or_else(|| {
                    TesseraError::Internal(format!(
                        "row has {} values, index {} reads column {}",
                        row.len(),
                        self.primary,
                        pos
                    ))
                })
            })
            .collect()
    }

    /// The entry a row contributes, or None when nulls are ignored and a
    /// key column is null.
    pub fn entry_for(&self, row: &[Value], row_id: RowId) -> Result<Option<IndexEntry>> {
        Ok(self.keyed_entry(row, row_id)?.map(|(entry, _)| entry))
    }

    /// Entry plus whether every key column is null.
    fn keyed_entry(&self, row: &[Value], row_id: RowId) -> Result<Option<(IndexEntry, bool)>> {
        let values = self.key_values(row)?;
        if self.ignore_nulls && values.iter().any(Value::is_null) {
            return Ok(None);
        }
        let all_null = values.iter().all(Value::is_null);
        let key = self.codec.encode(&values)?;
        Ok(Some((IndexEntry::new(key, row_id), all_null)))
    }

    /// Prepares the entry for a new row. Encoding errors surface here;
    /// uniqueness violations surface on commit.
    pub fn prepare_add_row(&mut self, row: &[Value], row_id: RowId) -> Result<PendingChange<'_>> {
        let new = self.keyed_entry(row, row_id)?;
        let violation = match &new {
            Some((entry, all_null)) => self.uniqueness_violation(entry, *all_null, None, "new")?,
            None => None,
        };
        Ok(PendingChange {
            data: self,
            old: None,
            new: new.map(|(entry, _)| entry),
            violation,
            committed: false,
        })
    }

    /// Prepares replacing a row's old entry with its new one. The row's own
    /// old entry never counts as a uniqueness conflict.
    pub fn prepare_update_row(
        &mut self,
        old_row: &[Value],
        new_row: &[Value],
        row_id: RowId,
    ) -> Result<PendingChange<'_>> {
        let old = self.entry_for(old_row, row_id)?;
        let new = self.keyed_entry(new_row, row_id)?;

        if old.as_ref() == new.as_ref().map(|(entry, _)| entry) {
            return Ok(PendingChange {
                data: self,
                old: None,
                new: None,
                violation: None,
                committed: false,
            });
        }

        let violation = match &new {
            Some((entry, all_null)) => self.uniqueness_violation(entry, *all_null, Some(row_id), "updated")?,
            None => None,
        };
        Ok(PendingChange {
            data: self,
            old,
            new: new.map(|(entry, _)| entry),
            violation,
            committed: false,
        })
    }

    fn uniqueness_violation(
        &self,
        entry: &IndexEntry,
        all_null: bool,
        except: Option<RowId>,
        what: &str,
    ) -> Result<Option<String>> {
        if !self.unique || all_null {
            return Ok(None);
        }
        Ok(self.key_holder(&entry.key, except)?.map(|holder| {
            format!(
                "{} row {} violates uniqueness of index {} (key held by row {})",
                what, entry.row_id, self.primary, holder
            )
        }))
    }

    /// Some row other than `except` holding `key`.
    fn key_holder(&self, key: &[u8], except: Option<RowId>) -> Result<Option<RowId>> {
        let from = EntryPosition::At(IndexEntry::new(key, RowId::First));
        for entry in self.tree.iterate(from, Direction::Next) {
            let entry = entry?;
            if entry.key != key {
                break;
            }
            if Some(entry.row_id) != except {
                return Ok(Some(entry.row_id));
            }
        }
        Ok(None)
    }

    /// Prepares removing a row's entry. Deletes never violate anything.
    pub fn prepare_delete_row(&mut self, row: &[Value], row_id: RowId) -> Result<PendingChange<'_>> {
        let old = self.entry_for(row, row_id)?;
        Ok(PendingChange {
            data: self,
            old,
            new: None,
            violation: None,
            committed: false,
        })
    }

    /// Removes the entry of a deleted row. Returns false if the row had none.
    pub fn delete_row(&mut self, row: &[Value], row_id: RowId) -> Result<bool> {
        match self.entry_for(row, row_id)? {
            Some(entry) => self.remove_entry(&entry),
            None => Ok(false),
        }
    }

    fn add_entry(&mut self, entry: IndexEntry) -> Result<bool> {
        let new_key = match self.counts {
            Some(_) => self.key_holder(&entry.key, None)?.is_none(),
            None => false,
        };
        if !self.tree.insert(entry)? {
            return Ok(false);
        }
        if let Some(counts) = &mut self.counts {
            counts.entries += 1;
            if new_key {
                counts.unique += 1;
            }
        }
        Ok(true)
    }

    fn remove_entry(&mut self, entry: &IndexEntry) -> Result<bool> {
        if !self.tree.delete(entry)? {
            return Ok(false);
        }
        if self.counts.is_some() {
            let last_of_key = self.key_holder(&entry.key, None)?.is_none();
            if let Some(counts) = &mut self.counts {
                counts.entries = counts.entries.saturating_sub(1);
                if last_of_key {
                    counts.unique = counts.unique.saturating_sub(1);
                }
            }
        }
        Ok(true)
    }

    /// True once counts are known.
    pub fn is_initialized(&self) -> bool {
        self.counts.is_some()
    }

    /// Scans every entry once to establish the counts.
    pub fn initialize(&mut self) -> Result<()> {
        if self.counts.is_some() {
            return Ok(());
        }

        let mut counts = EntryCounts::default();
        let mut last_key: Option<Vec<u8>> = None;
        for entry in self.tree.iterate(EntryPosition::BeforeFirst, Direction::Next) {
            let entry = entry?;
            counts.entries += 1;
            if last_key.as_deref() != Some(entry.key.as_slice()) {
                counts.unique += 1;
                last_key = Some(entry.key);
            }
        }

        debug!(
            index = %self.primary,
            entries = counts.entries,
            unique = counts.unique,
            "Initialized index data"
        );
        self.counts = Some(counts);
        Ok(())
    }

    /// Number of entries.
    pub fn entry_count(&mut self) -> Result<u64> {
        self.initialize()?;
        Ok(self.counts.map_or(0, |c| c.entries))
    }

    /// Number of distinct keys.
    pub fn unique_entry_count(&mut self) -> Result<u64> {
        self.initialize()?;
        Ok(self.counts.map_or(0, |c| c.unique))
    }

    /// Validates the tree structure and, once initialized, the entry count.
    pub fn validate(&self) -> Result<u64> {
        let entries = self.tree.validate()?;
        if let Some(counts) = self.counts {
            if counts.entries != entries {
                return Err(TesseraError::ValidationFailed(format!(
                    "index {} counts {} entries, tree holds {}",
                    self.primary, counts.entries, entries
                )));
            }
        }
        Ok(entries)
    }
}

impl std::fmt::Debug for IndexData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexData")
            .field("id", &self.id)
            .field("primary", &self.primary)
            .field("views", &self.views)
            .field("unique", &self.unique)
            .field("storage", &self.tree.storage_kind())
            .finish()
    }
}

/// One prepared index mutation. Nothing is applied until [`PendingChange::commit`].
#[must_use = "a pending change does nothing until committed"]
pub struct PendingChange<'a> {
    data: &'a mut IndexData,
    old: Option<IndexEntry>,
    new: Option<IndexEntry>,
    violation: Option<String>,
    committed: bool,
}

impl PendingChange<'_> {
    /// Logical index that owns the mutated data.
    pub fn index_name(&self) -> &str {
        self.data.primary_name()
    }

    /// The uniqueness violation commit will report, if any.
    pub fn violation(&self) -> Option<&str> {
        self.violation.as_deref()
    }

    /// Applies the change. Fails without mutating on a uniqueness violation.
    pub fn commit(&mut self) -> Result<()> {
        if self.committed {
            return Ok(());
        }
        if let Some(violation) = &self.violation {
            return Err(TesseraError::ConstraintViolation(violation.clone()));
        }

        if let Some(old) = &self.old {
            self.data.remove_entry(old)?;
        }
        if let Some(new) = &self.new {
            if let Err(e) = self.data.add_entry(new.clone()) {
                if let Some(old) = &self.old {
                    self.data.add_entry(old.clone())?;
                }
                return Err(e);
            }
        }
        self.committed = true;
        Ok(())
    }

    /// Undoes a committed change. A no-op otherwise.
    pub fn revert(&mut self) -> Result<()> {
        if !self.committed {
            return Ok(());
        }
        if let Some(new) = &self.new {
            self.data.remove_entry(new)?;
        }
        if let Some(old) = &self.old {
            self.data.add_entry(old.clone())?;
        }
        self.committed = false;
        Ok(())
    }
}

/// The changes one row makes across every index of a table.
#[derive(Default)]
pub struct PendingChanges<'a> {
    changes: Vec<PendingChange<'a>>,
}

impl<'a> PendingChanges<'a> {
    pub fn new() -> Self {
        Self { changes: Vec::new() }
    }

    pub fn push(&mut self, change: PendingChange<'a>) {
        self.changes.push(change);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Commits every change, or none of them.
    ///
    /// Violations are checked across all indexes before anything is
    /// applied. A later failure reverts the changes already committed.
    pub fn commit(&mut self) -> Result<()> {
        if let Some(violation) = self.changes.iter().find_map(|c| c.violation()) {
            return Err(TesseraError::ConstraintViolation(violation.to_string()));
        }
        for i in 0..self.changes.len() {
            if let Err(e) = self.changes[i].commit() {
                for change in self.changes[..i].iter_mut().rev() {
                    change.revert()?;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Reverts every committed change, newest first.
    pub fn revert(&mut self) -> Result<()> {
        for change in self.changes.iter_mut().rev() {
            change.revert()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_common::{Collation, DataType, PageId};
    use tessera_storage::{IndexColumn, MemoryPageStore};

    fn rid(n: u32) -> RowId {
        RowId::new(PageId(1), n as u16)
    }

    fn index(def: IndexDef) -> IndexData {
        let store = Arc::new(MemoryPageStore::new());
        let codec = EntryCodec::new(def.columns.clone(), Collation::General, 256);
        let tree = IndexPageTree::new(store, 64);
        IndexData::create(&def, codec, vec![0], tree)
    }

    fn by_id() -> IndexDef {
        IndexDef::new("ById", vec![IndexColumn::ascending("id", DataType::Long)])
    }

    fn add(data: &mut IndexData, id: Value, row: u32) -> Result<()> {
        data.prepare_add_row(&[id], rid(row))?.commit()
    }

    #[test]
    fn test_counts_track_duplicates() {
        let mut data = index(by_id());
        for (row, id) in [3, 1, 4, 1, 5, 9, 2, 6].into_iter().enumerate() {
            add(&mut data, Value::Long(id), row as u32).unwrap();
        }
        assert_eq!(data.entry_count().unwrap(), 8);
        assert_eq!(data.unique_entry_count().unwrap(), 7);

        assert!(data.delete_row(&[Value::Long(1)], rid(1)).unwrap());
        assert_eq!(data.entry_count().unwrap(), 7);
        assert_eq!(data.unique_entry_count().unwrap(), 7);

        assert!(data.delete_row(&[Value::Long(1)], rid(3)).unwrap());
        assert_eq!(data.unique_entry_count().unwrap(), 6);
        assert!(!data.delete_row(&[Value::Long(1)], rid(3)).unwrap());
        assert_eq!(data.validate().unwrap(), 6);
    }

    #[test]
    fn test_unique_violation_on_commit() {
        let mut data = index(by_id().unique());
        add(&mut data, Value::Long(7), 0).unwrap();

        let mut pending = data.prepare_add_row(&[Value::Long(7)], rid(1)).unwrap();
        assert!(pending.violation().is_some());
        let err = pending.commit().unwrap_err();
        assert!(err.to_string().contains("uniqueness"));
        pending.revert().unwrap();

        assert_eq!(data.entry_count().unwrap(), 1);
    }

    #[test]
    fn test_all_null_keys_are_exempt() {
        let mut data = index(by_id().unique());
        add(&mut data, Value::Null, 0).unwrap();
        add(&mut data, Value::Null, 1).unwrap();
        assert_eq!(data.entry_count().unwrap(), 2);
        assert_eq!(data.unique_entry_count().unwrap(), 1);
    }

    #[test]
    fn test_ignore_nulls_skips_entry() {
        let mut data = index(by_id().ignore_nulls());
        add(&mut data, Value::Null, 0).unwrap();
        add(&mut data, Value::Long(1), 1).unwrap();
        assert_eq!(data.entry_count().unwrap(), 1);
        assert!(!data.delete_row(&[Value::Null], rid(0)).unwrap());
    }

    #[test]
    fn test_encoding_error_surfaces_at_prepare() {
        let mut data = index(by_id());
        let err = data.prepare_add_row(&[Value::Text("abc".into())], rid(0)).err().unwrap();
        assert!(matches!(err, TesseraError::Encoding(_)));
        assert_eq!(data.entry_count().unwrap(), 0);
    }

    #[test]
    fn test_update_ignores_own_entry() {
        let mut data = index(by_id().unique());
        add(&mut data, Value::Long(1), 0).unwrap();
        add(&mut data, Value::Long(2), 1).unwrap();

        let mut same = data
            .prepare_update_row(&[Value::Long(1)], &[Value::Long(1)], rid(0))
            .unwrap();
        same.commit().unwrap();

        let mut clash = data
            .prepare_update_row(&[Value::Long(1)], &[Value::Long(2)], rid(0))
            .unwrap();
        assert!(clash.commit().is_err());

        let mut moved = data
            .prepare_update_row(&[Value::Long(1)], &[Value::Long(5)], rid(0))
            .unwrap();
        moved.commit().unwrap();
        moved.revert().unwrap();
        drop(moved);

        let keys: Vec<_> = data
            .tree()
            .iterate(EntryPosition::BeforeFirst, Direction::Next)
            .map(|e| data.codec().decode(&e.unwrap().key).unwrap())
            .collect();
        assert_eq!(keys, vec![vec![Value::Long(1)], vec![Value::Long(2)]]);
    }

    #[test]
    fn test_pending_changes_all_or_nothing() {
        let mut first = index(by_id());
        let mut second = index(by_id().unique());
        add(&mut second, Value::Long(4), 0).unwrap();

        let mut changes = PendingChanges::new();
        changes.push(first.prepare_add_row(&[Value::Long(4)], rid(1)).unwrap());
        changes.push(second.prepare_add_row(&[Value::Long(4)], rid(1)).unwrap());
        assert_eq!(changes.len(), 2);
        assert!(changes.commit().unwrap_err().is_constraint_violation());
        drop(changes);

        assert_eq!(first.entry_count().unwrap(), 0);
        assert_eq!(second.entry_count().unwrap(), 1);
    }

    #[test]
    fn test_prepared_delete_reverts() {
        let mut by_key = index(by_id());
        let mut unique = index(by_id().unique());
        for (row, id) in [(0, 1), (1, 1), (2, 2)] {
            add(&mut by_key, Value::Long(id), row).unwrap();
            add(&mut unique, Value::Long(id + row as i32), row).unwrap();
        }

        let mut changes = PendingChanges::new();
        changes.push(by_key.prepare_delete_row(&[Value::Long(1)], rid(1)).unwrap());
        changes.push(unique.prepare_delete_row(&[Value::Long(2)], rid(1)).unwrap());
        changes.commit().unwrap();
        changes.revert().unwrap();
        drop(changes);

        assert_eq!(by_key.entry_count().unwrap(), 3);
        assert_eq!(by_key.unique_entry_count().unwrap(), 2);
        assert_eq!(unique.entry_count().unwrap(), 3);
        assert_eq!(by_key.validate().unwrap(), 3);
        assert_eq!(unique.validate().unwrap(), 3);

        let mut change = by_key.prepare_delete_row(&[Value::Long(1)], rid(1)).unwrap();
        change.commit().unwrap();
        drop(change);
        assert_eq!(by_key.entry_count().unwrap(), 2);
        assert_eq!(by_key.unique_entry_count().unwrap(), 2);
    }

    #[test]
    fn test_attached_index_initializes_lazily() {
        let store = Arc::new(MemoryPageStore::new());
        let def = by_id();
        let codec = EntryCodec::new(def.columns.clone(), Collation::General, 256);
        let mut data = IndexData::create(&def, codec.clone(), vec![0], IndexPageTree::new(store.clone(), 64));
        for n in 0..20 {
            add(&mut data, Value::Long(n % 5), n as u32).unwrap();
        }

        let tree = IndexPageTree::open(store, data.root(), 64).unwrap();
        let mut reopened = IndexData::attach(&def, codec, vec![0], tree);
        assert!(!reopened.is_initialized());
        add(&mut reopened, Value::Long(99), 50).unwrap();
        assert!(!reopened.is_initialized());

        assert_eq!(reopened.entry_count().unwrap(), 21);
        assert_eq!(reopened.unique_entry_count().unwrap(), 6);
        assert!(reopened.is_initialized());
        assert_ne!(reopened.id(), data.id());
    }
}
