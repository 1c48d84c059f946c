//! Index semantics through the table API.
//!
//! Covers entry and unique counts, uniqueness enforcement (including the
//! all-null exemption), sort direction, inline-to-paged promotion and
//! reopening a table from its serialized descriptor.

use std::sync::Arc;
use tempfile::tempdir;

use tessera_common::{DataType, EngineConfig, StorageConfig, TesseraError, Value};
use tessera_storage::{Column, DiskManager, IndexColumn, MemoryPageStore, PageStore, Row, StorageKind};
use tessera_table::{IndexDef, IterOptions, Table, TableDescriptor, TableSchema};

fn keyed(index: IndexDef) -> Table {
    let schema = TableSchema::new(
        "keyed",
        vec![Column::new("k", DataType::Long), Column::new("note", DataType::Text)],
    )
    .with_index(index);
    Table::create(Arc::new(MemoryPageStore::new()), schema, &EngineConfig::default()).unwrap()
}

fn by_k() -> IndexDef {
    IndexDef::new("ByK", vec![IndexColumn::ascending("k", DataType::Long)])
}

fn k(row: &Row) -> Option<i32> {
    match row.get("k") {
        Some(Value::Long(v)) => Some(*v),
        Some(Value::Null) => None,
        other => panic!("unexpected k {:?}", other),
    }
}

fn index_order(table: &Table, index: &str) -> Vec<Option<i32>> {
    let mut cursor = table.index_cursor(index).unwrap();
    cursor.iter().map(|row| k(&row.unwrap())).collect()
}

#[test]
fn test_duplicate_key_scenario() {
    let table = keyed(by_k());
    let mut ids = Vec::new();
    for key in [3, 1, 4, 1, 5, 9, 2, 6] {
        ids.push(table.add_row(&[Value::Long(key), Value::Null]).unwrap());
    }

    let keys: Vec<Option<i32>> = index_order(&table, "ByK");
    assert_eq!(keys, [1, 1, 2, 3, 4, 5, 6, 9].map(Some).to_vec());
    assert_eq!(table.entry_count("ByK").unwrap(), 8);
    assert_eq!(table.unique_entry_count("ByK").unwrap(), 7);

    table.delete_row(ids[1]).unwrap();
    assert_eq!(table.entry_count("ByK").unwrap(), 7);
    assert_eq!(table.unique_entry_count("ByK").unwrap(), 7);

    table.delete_row(ids[3]).unwrap();
    assert_eq!(table.entry_count("ByK").unwrap(), 6);
    assert_eq!(table.unique_entry_count("ByK").unwrap(), 6);
    table.validate_indexes().unwrap();
}

#[test]
fn test_reverse_iteration_is_exact_reverse() {
    let table = keyed(by_k());
    for key in [7, 3, 3, 9, -2, 0, 3] {
        table.add_row(&[Value::Long(key), Value::Null]).unwrap();
    }
    let mut cursor = table.index_cursor("ByK").unwrap();
    let forward: Vec<_> = cursor.iter().map(|r| r.unwrap().id()).collect();
    let mut backward: Vec<_> = cursor.reverse_iter().map(|r| r.unwrap().id()).collect();
    backward.reverse();
    assert_eq!(forward, backward);
}

#[test]
fn test_unique_index_rejects_duplicates() {
    let table = keyed(by_k().unique());
    table.add_row(&[Value::Long(1), Value::from("first")]).unwrap();
    table.add_row(&[Value::Long(2), Value::from("second")]).unwrap();

    let err = table.add_row(&[Value::Long(1), Value::from("again")]).unwrap_err();
    assert!(matches!(err, TesseraError::ConstraintViolation(_)));
    assert!(err.to_string().contains("uniqueness"));
    assert_eq!(table.entry_count("ByK").unwrap(), 2);
    assert_eq!(table.row_count(), 2);

    table.add_row(&[Value::Null, Value::from("n1")]).unwrap();
    table.add_row(&[Value::Null, Value::from("n2")]).unwrap();
    assert_eq!(table.entry_count("ByK").unwrap(), 4);
    assert_eq!(table.unique_entry_count("ByK").unwrap(), 3);
    assert_eq!(index_order(&table, "ByK"), vec![None, None, Some(1), Some(2)]);
    table.validate_indexes().unwrap();
}

#[test]
fn test_ignore_nulls_leaves_rows_out() {
    let table = keyed(by_k().ignore_nulls());
    table.add_row(&[Value::Null, Value::from("skip")]).unwrap();
    table.add_row(&[Value::Long(4), Value::from("keep")]).unwrap();

    assert_eq!(table.entry_count("ByK").unwrap(), 1);
    assert_eq!(index_order(&table, "ByK"), vec![Some(4)]);

    let mut cursor = table.index_cursor("ByK").unwrap();
    assert!(!cursor.find_first_row(&[("k", Value::Null)]).unwrap());
    table.validate_indexes().unwrap();
}

#[test]
fn test_descending_composite_order() {
    let schema = TableSchema::new(
        "scores",
        vec![Column::new("player", DataType::Text), Column::new("score", DataType::Double)],
    )
    .with_index(IndexDef::new(
        "ByPlayerBest",
        vec![
            IndexColumn::ascending("player", DataType::Text),
            IndexColumn::descending("score", DataType::Double),
        ],
    ));
    let table = Table::create(Arc::new(MemoryPageStore::new()), schema, &EngineConfig::default()).unwrap();
    for (player, score) in [("bo", 3.5), ("al", 1.0), ("bo", 9.25), ("al", -4.0), ("Al", 7.0)] {
        table.add_row(&[Value::from(player), Value::Double(score)]).unwrap();
    }

    let mut cursor = table.index_cursor("ByPlayerBest").unwrap();
    let scores: Vec<Value> = cursor
        .iter_with(IterOptions::new().columns(["score"]))
        .map(|r| r.unwrap().get("score").cloned().unwrap())
        .collect();
    assert_eq!(
        scores,
        [7.0, 1.0, -4.0, 9.25, 3.5].map(Value::Double).to_vec()
    );

    let bo: Vec<Value> = cursor
        .entry_iter(&[Value::from("BO")])
        .unwrap()
        .map(|r| r.unwrap().get("score").cloned().unwrap())
        .collect();
    assert_eq!(bo, vec![Value::Double(9.25), Value::Double(3.5)]);
}

#[test]
fn test_encoding_error_rejects_row() {
    let table = keyed(by_k());
    let err = table.add_row(&[Value::from("not a number"), Value::Null]).unwrap_err();
    assert!(matches!(err, TesseraError::Encoding(_)));
    assert_eq!(table.row_count(), 0);
}

#[test]
fn test_batch_add_reports_succeeded_rows() {
    let table = keyed(by_k().unique());
    let rows: Vec<Vec<Value>> = [1, 2, 3, 2, 5]
        .into_iter()
        .map(|key| vec![Value::Long(key), Value::Null])
        .collect();

    let err = table.add_rows(&rows).unwrap_err();
    match &err {
        TesseraError::BatchFailed { succeeded, .. } => assert_eq!(*succeeded, 3),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(err.is_constraint_violation());
    assert_eq!(table.row_count(), 3);

    let ids = table.add_rows(&rows[4..]).unwrap();
    assert_eq!(ids.len(), 1);
    table.validate_indexes().unwrap();
}

#[test]
fn test_promotion_is_invisible() {
    let mut config = EngineConfig::default();
    config.storage.inline_index_threshold = 128;
    let schema = TableSchema::new("grow", vec![Column::new("k", DataType::Long)]).with_index(by_k());
    let table = Table::create(Arc::new(MemoryPageStore::new()), schema, &config).unwrap();

    table.add_row(&[Value::Long(1)]).unwrap();
    assert_eq!(table.index_storage("ByK").unwrap(), StorageKind::Inline);

    for key in (2..400).rev() {
        table.add_row(&[Value::Long(key)]).unwrap();
    }
    assert_eq!(table.index_storage("ByK").unwrap(), StorageKind::Paged);
    assert_eq!(index_order(&table, "ByK"), (1..400).map(Some).collect::<Vec<_>>());
    table.validate_indexes().unwrap();
}

#[test]
fn test_reopen_from_descriptor() {
    let dir = tempdir().unwrap();
    let config = EngineConfig {
        storage: StorageConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
            inline_index_threshold: 256,
        },
        ..Default::default()
    };

    let schema = TableSchema::new(
        "people",
        vec![Column::new("id", DataType::Long).required(), Column::new("name", DataType::Text)],
    )
    .with_index(IndexDef::new("PrimaryKey", vec![IndexColumn::ascending("id", DataType::Long)]).unique())
    .with_index(IndexDef::new("ByName", vec![IndexColumn::ascending("name", DataType::Text)]));

    let json = {
        let store: Arc<dyn PageStore> = Arc::new(DiskManager::open(config.storage.clone()).unwrap());
        let table = Table::create(store.clone(), schema, &config).unwrap();
        for id in 0..300 {
            table
                .add_row(&[Value::Long(id), Value::Text(format!("person {}", id % 50))])
                .unwrap();
        }
        store.flush().unwrap();
        serde_json::to_string(&table.descriptor()).unwrap()
    };

    let descriptor: TableDescriptor = serde_json::from_str(&json).unwrap();
    let store: Arc<dyn PageStore> = Arc::new(DiskManager::open(config.storage.clone()).unwrap());
    let table = Table::open(store, descriptor, &config).unwrap();

    assert_eq!(table.row_count(), 300);
    assert_eq!(table.entry_count("PrimaryKey").unwrap(), 300);
    assert_eq!(table.unique_entry_count("ByName").unwrap(), 50);
    table.validate_indexes().unwrap();

    let err = table
        .add_row(&[Value::Long(42), Value::from("dup")])
        .unwrap_err();
    assert!(err.is_constraint_violation());

    let mut cursor = table.index_cursor("PrimaryKey").unwrap();
    assert!(cursor.find_first_row_by_entry(&[Value::Long(299)]).unwrap());
    assert_eq!(
        cursor.current_row().unwrap().unwrap().get("name"),
        Some(&Value::from("person 49"))
    );
}
