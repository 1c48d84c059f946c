//! Tables: a row heap plus the indexes kept in step with it.

use crate::cursor::{Cursor, CursorBuilder};
use crate::index_data::{IndexData, PendingChanges};
use crate::schema::{ColumnMatch, IndexDef, TableSchema};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_common::{EngineConfig, PageId, Result, TesseraError, Value};
use tessera_storage::{
    Column, EntryCodec, IndexPageTree, PageStore, Row, RowCodec, RowHeap, RowId, StorageKind,
    TreeRoot, begin_batch,
};
use tracing::{debug, trace, warn};

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Everything needed to reattach a table to its page store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub schema: TableSchema,
    /// Data pages of the row heap.
    pub data_pages: Vec<PageId>,
    /// Tree root of each index data, in the order the data was created.
    pub index_roots: Vec<TreeRoot>,
}

/// Mutable table contents, guarded by the table's lock.
pub(crate) struct TableState {
    pub(crate) heap: RowHeap,
    pub(crate) indexes: Vec<IndexData>,
}

impl TableState {
    pub(crate) fn index(&self, slot: usize) -> Result<&IndexData> {
        self.indexes
            .get(slot)
            .ok_or_else(|| TesseraError::Internal(format!("no index data in slot {}", slot)))
    }

    pub(crate) fn index_mut(&mut self, slot: usize) -> Result<&mut IndexData> {
        self.indexes
            .get_mut(slot)
            .ok_or_else(|| TesseraError::Internal(format!("no index data in slot {}", slot)))
    }
}

#[derive(Debug, Default)]
struct ObservedRow {
    row_id: Option<RowId>,
    deleted: bool,
    /// Stored bytes of the row once it is deleted underneath the cursor,
    /// when still known.
    image: Option<Vec<u8>>,
}

/// The row an open cursor sits on, as seen by the table.
#[derive(Debug, Default)]
pub(crate) struct RowObserver {
    inner: Mutex<ObservedRow>,
}

impl RowObserver {
    /// Records the row the cursor moved to and clears any deleted state.
    pub(crate) fn watch(&self, row_id: Option<RowId>) {
        let mut observed = self.inner.lock();
        observed.row_id = row_id;
        observed.deleted = false;
        observed.image = None;
    }

    /// Marks the watched row deleted, keeping `image` if given.
    pub(crate) fn mark_deleted(&self, image: Option<Vec<u8>>) {
        let mut observed = self.inner.lock();
        observed.deleted = true;
        observed.image = image;
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.inner.lock().deleted
    }

    pub(crate) fn deleted_row(&self) -> Option<Vec<u8>> {
        self.inner.lock().image.clone()
    }

    fn row_deleted(&self, row_id: RowId, raw: &[u8]) -> bool {
        let mut observed = self.inner.lock();
        if observed.row_id != Some(row_id) || observed.deleted {
            return false;
        }
        observed.deleted = true;
        observed.image = Some(raw.to_vec());
        true
    }
}

/// Keeps an observer registered with its table until dropped.
pub(crate) struct ObserverGuard<'t> {
    table: &'t Table,
    observer: Arc<RowObserver>,
}

impl ObserverGuard<'_> {
    pub(crate) fn observer(&self) -> &RowObserver {
        &self.observer
    }
}

impl Drop for ObserverGuard<'_> {
    fn drop(&mut self) {
        self.table
            .observers
            .lock()
            .retain(|o| !Arc::ptr_eq(o, &self.observer));
    }
}

/// A table of rows with its secondary indexes.
///
/// Every mutation goes through the table so the heap and all indexes stay
/// consistent: a row is added to every index or to none, and deletions are
/// reported synchronously to every open cursor.
pub struct Table {
    id: u64,
    name: String,
    row_codec: RowCodec,
    indexes: Vec<IndexDef>,
    /// Index data slot of each logical index, parallel to `indexes`.
    slots: Vec<usize>,
    store: Arc<dyn PageStore>,
    state: RwLock<TableState>,
    observers: Mutex<Vec<Arc<RowObserver>>>,
}

impl Table {
    /// Creates an empty table in `store`.
    pub fn create(store: Arc<dyn PageStore>, schema: TableSchema, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let heap = RowHeap::create(store.clone());
        let table = Self::build(store, schema, config, heap, None)?;
        debug!(
            table = %table.name,
            columns = table.row_codec.columns().len(),
            indexes = table.indexes.len(),
            "Created table"
        );
        Ok(table)
    }

    /// Reattaches a table described by `descriptor`.
    pub fn open(store: Arc<dyn PageStore>, descriptor: TableDescriptor, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let heap = RowHeap::open(store.clone(), &descriptor.data_pages)?;
        let table = Self::build(store, descriptor.schema, config, heap, Some(&descriptor.index_roots))?;
        debug!(
            table = %table.name,
            rows = table.row_count(),
            data_pages = descriptor.data_pages.len(),
            "Opened table"
        );
        Ok(table)
    }

    fn build(
        store: Arc<dyn PageStore>,
        schema: TableSchema,
        config: &EngineConfig,
        heap: RowHeap,
        roots: Option<&[TreeRoot]>,
    ) -> Result<Self> {
        let row_codec = RowCodec::new(schema.columns.clone());
        for (i, column) in schema.columns.iter().enumerate() {
            if schema.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(TesseraError::InvalidArgument(format!(
                    "duplicate column {} in table {}",
                    column.name, schema.name
                )));
            }
        }

        let threshold = config.storage.inline_index_threshold;
        let mut datas: Vec<IndexData> = Vec::new();
        let mut owners: Vec<&IndexDef> = Vec::new();
        let mut slots = Vec::with_capacity(schema.indexes.len());

        for (i, def) in schema.indexes.iter().enumerate() {
            if schema.indexes[..i].iter().any(|d| d.name == def.name) {
                return Err(TesseraError::InvalidArgument(format!(
                    "duplicate index {} in table {}",
                    def.name, schema.name
                )));
            }
            if def.columns.is_empty() {
                return Err(TesseraError::InvalidArgument(format!("index {} has no columns", def.name)));
            }

            if let Some(slot) = owners.iter().position(|owner| owner.shares_data_with(def)) {
                datas[slot].add_view(&def.name);
                slots.push(slot);
                continue;
            }

            let positions = def
                .columns
                .iter()
                .map(|key| {
                    let pos = row_codec.column_index(&key.name)?;
                    let declared = schema.columns[pos].data_type;
                    if declared != key.data_type {
                        return Err(TesseraError::InvalidArgument(format!(
                            "index {} declares {} as {}, column is {}",
                            def.name, key.name, key.data_type, declared
                        )));
                    }
                    Ok(pos)
                })
                .collect::<Result<Vec<_>>>()?;

            let codec = EntryCodec::new(def.columns.clone(), config.index.collation, config.index.max_key_size);
            let data = match roots {
                Some(roots) => {
                    let root = roots.get(datas.len()).cloned().ok_or_else(|| {
                        TesseraError::InvalidArgument(format!("descriptor has no root for index {}", def.name))
                    })?;
                    let tree = IndexPageTree::open(store.clone(), root, threshold)?;
                    IndexData::attach(def, codec, positions, tree)
                }
                None => IndexData::create(def, codec, positions, IndexPageTree::new(store.clone(), threshold)),
            };

            slots.push(datas.len());
            owners.push(def);
            datas.push(data);
        }

        if let Some(roots) = roots {
            if roots.len() != datas.len() {
                return Err(TesseraError::InvalidArgument(format!(
                    "descriptor has {} index roots, table has {} index data",
                    roots.len(),
                    datas.len()
                )));
            }
        }

        Ok(Self {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            name: schema.name,
            row_codec,
            indexes: schema.indexes,
            slots,
            store,
            state: RwLock::new(TableState {
                heap,
                indexes: datas,
            }),
            observers: Mutex::new(Vec::new()),
        })
    }

    /// Captures the table layout for a later [`Table::open`].
    pub fn descriptor(&self) -> TableDescriptor {
        let state = self.state.read();
        TableDescriptor {
            schema: TableSchema {
                name: self.name.clone(),
                columns: self.row_codec.columns().to_vec(),
                indexes: self.indexes.clone(),
            },
            data_pages: state.heap.page_ids(),
            index_roots: state.indexes.iter().map(IndexData::root).collect(),
        }
    }

    /// Process-unique identity of this table handle.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        self.row_codec.columns()
    }

    pub fn row_codec(&self) -> &RowCodec {
        &self.row_codec
    }

    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    /// Logical indexes in declaration order.
    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    /// Looks up a logical index by name.
    pub fn index(&self, name: &str) -> Result<&IndexDef> {
        self.indexes
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| TesseraError::IndexNotFound(format!("{}.{}", self.name, name)))
    }

    pub(crate) fn index_slot(&self, name: &str) -> Result<usize> {
        self.indexes
            .iter()
            .position(|d| d.name == name)
            .and_then(|i| self.slots.get(i).copied())
            .ok_or_else(|| TesseraError::IndexNotFound(format!("{}.{}", self.name, name)))
    }

    /// Finds a logical index over `columns`.
    pub fn find_index_for_columns(&self, columns: &[&str], mode: ColumnMatch) -> Option<&IndexDef> {
        if columns.is_empty() {
            return None;
        }
        self.indexes.iter().find(|def| {
            let names: Vec<&str> = def.column_names().collect();
            match mode {
                ColumnMatch::Exact => names == columns,
                ColumnMatch::Prefix => names.starts_with(columns),
            }
        })
    }

    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, TableState> {
        self.state.read()
    }

    pub(crate) fn write_state(&self) -> RwLockWriteGuard<'_, TableState> {
        self.state.write()
    }

    /// Number of live rows.
    pub fn row_count(&self) -> u64 {
        self.state.read().heap.live_count()
    }

    /// Identity of the index data behind a logical index.
    pub fn index_data_id(&self, index: &str) -> Result<u64> {
        let slot = self.index_slot(index)?;
        Ok(self.state.read().index(slot)?.id())
    }

    /// Number of entries in an index.
    pub fn entry_count(&self, index: &str) -> Result<u64> {
        let slot = self.index_slot(index)?;
        self.state.write().index_mut(slot)?.entry_count()
    }

    /// Number of distinct keys in an index.
    pub fn unique_entry_count(&self, index: &str) -> Result<u64> {
        let slot = self.index_slot(index)?;
        self.state.write().index_mut(slot)?.unique_entry_count()
    }

    /// Whether an index currently keeps its entries inline or in pages.
    pub fn index_storage(&self, index: &str) -> Result<StorageKind> {
        let slot = self.index_slot(index)?;
        Ok(self.state.read().index(slot)?.storage_kind())
    }

    /// Computes the counts of every index not yet initialized.
    pub fn initialize_indexes(&self) -> Result<()> {
        let mut state = self.state.write();
        for data in state.indexes.iter_mut() {
            data.initialize()?;
        }
        Ok(())
    }

    /// Coerces caller values to the column types and checks required columns.
    fn prepare_values(&self, values: &[Value]) -> Result<Vec<Value>> {
        let values = self.row_codec.coerce_row(values)?;
        for (column, value) in self.row_codec.columns().iter().zip(&values) {
            if column.required && value.is_null() {
                return Err(TesseraError::ConstraintViolation(format!(
                    "column {} of table {} is required",
                    column.name, self.name
                )));
            }
        }
        Ok(values)
    }

    /// Decodes a stored row into one value per column.
    pub(crate) fn row_values(&self, row_id: RowId, raw: &[u8]) -> Result<Vec<Value>> {
        let row = self.row_codec.decode_row(row_id, raw, None)?;
        Ok(self
            .row_codec
            .columns()
            .iter()
            .map(|c| row.get(&c.name).cloned().unwrap_or(Value::Null))
            .collect())
    }

    fn insert_row(state: &mut TableState, values: &[Value], raw: &[u8]) -> Result<RowId> {
        let TableState { heap, indexes } = state;
        let row_id = heap.reserve(raw.len())?;

        let mut changes = PendingChanges::new();
        for data in indexes.iter_mut() {
            changes.push(data.prepare_add_row(values, row_id)?);
        }
        changes.commit()?;

        if let Err(e) = heap.insert_at(row_id, raw) {
            changes.revert()?;
            return Err(e);
        }
        Ok(row_id)
    }

    /// Adds a row given one value per column.
    pub fn add_row(&self, values: &[Value]) -> Result<RowId> {
        let values = self.prepare_values(values)?;
        let raw = self.row_codec.encode_row(&values)?;
        let mut state = self.state.write();
        Self::insert_row(&mut state, &values, &raw)
    }

    /// Adds rows inside one write batch.
    ///
    /// Stops at the first failing row. Rows before it stay added, and the
    /// error reports how many succeeded.
    pub fn add_rows(&self, rows: &[Vec<Value>]) -> Result<Vec<RowId>> {
        let batch = begin_batch(self.store.as_ref());
        let mut state = self.state.write();
        let mut ids = Vec::with_capacity(rows.len());

        for (i, values) in rows.iter().enumerate() {
            let added = match self.prepare_values(values) {
                Ok(values) => match self.row_codec.encode_row(&values) {
                    Ok(raw) => Self::insert_row(&mut state, &values, &raw),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            match added {
                Ok(row_id) => ids.push(row_id),
                Err(e) => {
                    warn!(table = %self.name, row = i, error = %e, "Batch row failed");
                    return Err(TesseraError::BatchFailed {
                        succeeded: i,
                        source: Box::new(e),
                    });
                }
            }
        }

        drop(state);
        batch.finish()?;
        Ok(ids)
    }

    /// Replaces the values of an existing row.
    ///
    /// A uniqueness violation leaves the row and every index unchanged. A row
    /// can only grow into the free space of its own page; past that the
    /// update fails with [`TesseraError::PageFull`] and nothing changes.
    pub fn update_row(&self, row_id: RowId, values: &[Value]) -> Result<()> {
        let new_values = self.prepare_values(values)?;
        let raw = self.row_codec.encode_row(&new_values)?;

        let mut state = self.state.write();
        let TableState { heap, indexes } = &mut *state;
        let old_raw = heap
            .get(row_id)?
            .ok_or_else(|| TesseraError::IllegalState(format!("row {} does not exist", row_id)))?;
        let old_values = self.row_values(row_id, &old_raw)?;

        let mut changes = PendingChanges::new();
        for data in indexes.iter_mut() {
            changes.push(data.prepare_update_row(&old_values, &new_values, row_id)?);
        }
        changes.commit()?;

        if let Err(e) = heap.update(row_id, &raw) {
            changes.revert()?;
            return Err(e);
        }
        Ok(())
    }

    /// Deletes a row from the heap and every index, then tells every open
    /// cursor. Returns false if the row does not exist.
    ///
    /// On failure every index entry already removed is put back, so the row
    /// stays fully indexed.
    pub fn delete_row(&self, row_id: RowId) -> Result<bool> {
        let mut state = self.state.write();
        let TableState { heap, indexes } = &mut *state;
        let Some(raw) = heap.get(row_id)? else {
            return Ok(false);
        };
        let values = self.row_values(row_id, &raw)?;

        let mut changes = PendingChanges::new();
        for data in indexes.iter_mut() {
            changes.push(data.prepare_delete_row(&values, row_id)?);
        }
        changes.commit()?;

        if let Err(e) = heap.delete(row_id) {
            changes.revert()?;
            return Err(e);
        }
        drop(changes);
        drop(state);

        self.notify_deleted(row_id, &raw);
        Ok(true)
    }

    fn notify_deleted(&self, row_id: RowId, raw: &[u8]) {
        let observers = self.observers.lock();
        for observer in observers.iter() {
            if observer.row_deleted(row_id, raw) {
                trace!(table = %self.name, row = %row_id, "Cursor row deleted underneath it");
            }
        }
    }

    /// Reads a row, decoding only `columns` when given.
    pub fn get_row(&self, row_id: RowId, columns: Option<&[String]>) -> Result<Option<Row>> {
        let raw = self.state.read().heap.get(row_id)?;
        match raw {
            Some(raw) => self.row_codec.decode_row(row_id, &raw, columns).map(Some),
            None => Ok(None),
        }
    }

    /// True if the heap holds a live row at `row_id`.
    pub fn contains_row(&self, row_id: RowId) -> Result<bool> {
        Ok(self.state.read().heap.get(row_id)?.is_some())
    }

    pub(crate) fn register_observer(&self) -> ObserverGuard<'_> {
        let observer = Arc::new(RowObserver::default());
        self.observers.lock().push(observer.clone());
        ObserverGuard { table: self, observer }
    }

    /// Number of cursors currently open on this table.
    pub fn open_cursors(&self) -> usize {
        self.observers.lock().len()
    }

    /// Checks every index tree and that each live row has exactly its
    /// expected entries.
    pub fn validate_indexes(&self) -> Result<()> {
        let state = self.state.read();
        let mut expected = vec![0u64; state.indexes.len()];

        let mut last = RowId::First;
        while let Some(row_id) = state.heap.next_row_id(last)? {
            last = row_id;
            let Some(raw) = state.heap.get(row_id)? else {
                continue;
            };
            let values = self.row_values(row_id, &raw)?;
            for (data, count) in state.indexes.iter().zip(expected.iter_mut()) {
                if let Some(entry) = data.entry_for(&values, row_id)? {
                    if !data.tree().contains(&entry)? {
                        return Err(TesseraError::ValidationFailed(format!(
                            "index {} has no entry for row {}",
                            data.primary_name(),
                            row_id
                        )));
                    }
                    *count += 1;
                }
            }
        }

        for (data, expected) in state.indexes.iter().zip(expected) {
            let found = data.validate()?;
            if found != expected {
                return Err(TesseraError::ValidationFailed(format!(
                    "index {} holds {} entries for {} indexed rows",
                    data.primary_name(),
                    found,
                    expected
                )));
            }
        }
        Ok(())
    }

    /// Forward scan over live rows in RowId order.
    pub fn scan(&self) -> TableScan<'_> {
        TableScan {
            table: self,
            last: RowId::First,
            columns: None,
        }
    }

    /// A cursor walking the table in RowId order.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::table_scan(self)
    }

    /// A cursor over a logical index.
    pub fn index_cursor(&self, index: &str) -> Result<Cursor<'_>> {
        CursorBuilder::new(self).index(index).build()
    }

    /// A cursor builder for sub-ranges and custom matchers.
    pub fn cursor_builder(&self) -> CursorBuilder<'_> {
        CursorBuilder::new(self)
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("columns", &self.row_codec.columns().len())
            .field("indexes", &self.indexes.len())
            .finish()
    }
}

/// Forward table scan, resumable across mutations.
pub struct TableScan<'t> {
    table: &'t Table,
    last: RowId,
    columns: Option<Vec<String>>,
}

impl TableScan<'_> {
    /// Decodes only the named columns.
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Next live row after the last one returned.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            let next = self.table.read_state().heap.next_row_id(self.last)?;
            let Some(row_id) = next else {
                self.last = RowId::Last;
                return Ok(None);
            };
            self.last = row_id;
            if let Some(row) = self.table.get_row(row_id, self.columns.as_deref())? {
                return Ok(Some(row));
            }
        }
    }

    /// Starts over from the first row.
    pub fn reset(&mut self) {
        self.last = RowId::First;
    }
}
