//! Large randomized index workloads.
//!
//! A seeded random mix of inserts, updates and deletes is applied to a table
//! with two indexes, and every index view is checked against an in-memory
//! model at fixed checkpoints.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tessera_common::{DataType, EngineConfig, TesseraError, Value};
use tessera_storage::{Column, IndexColumn, MemoryPageStore, RowId, StorageKind};
use tessera_table::{IndexDef, IterOptions, Table, TableSchema};

const OPERATIONS: usize = 4000;
const CHECK_EVERY: usize = 500;

fn random_word(rng: &mut StdRng) -> String {
    let len = rng.random_range(1..=8);
    (0..len)
        .map(|_| {
            let c = rng.random_range(b'a'..=b'f') as char;
            if rng.random_bool(0.3) { c.to_ascii_uppercase() } else { c }
        })
        .collect()
}

fn create_table() -> Table {
    let mut config = EngineConfig::default();
    config.storage.inline_index_threshold = 512;
    let schema = TableSchema::new(
        "samples",
        vec![Column::new("value", DataType::BigInt), Column::new("word", DataType::Text)],
    )
    .with_index(IndexDef::new("ByValue", vec![IndexColumn::ascending("value", DataType::BigInt)]))
    .with_index(IndexDef::new(
        "ByWordValue",
        vec![
            IndexColumn::ascending("word", DataType::Text),
            IndexColumn::descending("value", DataType::BigInt),
        ],
    ));
    Table::create(Arc::new(MemoryPageStore::new()), schema, &config).unwrap()
}

fn check(table: &Table, model: &BTreeMap<RowId, (i64, String)>, rng: &mut StdRng) {
    table.validate_indexes().unwrap();
    assert_eq!(table.row_count(), model.len() as u64);

    let mut by_value: Vec<(i64, RowId)> = model.iter().map(|(id, (v, _))| (*v, *id)).collect();
    by_value.sort();
    let mut cursor = table.index_cursor("ByValue").unwrap();
    let seen: Vec<(i64, RowId)> = cursor
        .iter_with(IterOptions::new().columns(["value"]))
        .map(|row| {
            let row = row.unwrap();
            match row.get("value") {
                Some(Value::BigInt(v)) => (*v, row.id()),
                other => panic!("unexpected value {:?}", other),
            }
        })
        .collect();
    assert_eq!(seen, by_value);

    let backward: Vec<RowId> = cursor.reverse_iter().map(|r| r.unwrap().id()).collect();
    assert!(backward.iter().eq(by_value.iter().rev().map(|(_, id)| id)));

    let distinct: BTreeSet<i64> = model.values().map(|(v, _)| *v).collect();
    assert_eq!(table.entry_count("ByValue").unwrap(), model.len() as u64);
    assert_eq!(table.unique_entry_count("ByValue").unwrap(), distinct.len() as u64);

    let mut by_word: Vec<(String, std::cmp::Reverse<i64>, RowId)> = model
        .iter()
        .map(|(id, (v, w))| (w.to_lowercase(), std::cmp::Reverse(*v), *id))
        .collect();
    by_word.sort();
    let mut cursor = table.index_cursor("ByWordValue").unwrap();
    let ids: Vec<RowId> = cursor.iter().map(|r| r.unwrap().id()).collect();
    assert!(ids.iter().eq(by_word.iter().map(|(_, _, id)| id)));

    let lo = rng.random_range(0..500i64);
    let hi = rng.random_range(lo..=500);
    let mut ranged = table
        .cursor_builder()
        .index("ByValue")
        .start_entry(vec![Value::BigInt(lo)], true)
        .end_entry(vec![Value::BigInt(hi)], false)
        .build()
        .unwrap();
    let in_range: Vec<RowId> = ranged.iter().map(|r| r.unwrap().id()).collect();
    let expected: Vec<RowId> = by_value
        .iter()
        .filter(|(v, _)| (lo..hi).contains(v))
        .map(|(_, id)| *id)
        .collect();
    assert_eq!(in_range, expected);
}

#[test]
fn test_random_workload_matches_model() {
    let table = create_table();
    let mut model: BTreeMap<RowId, (i64, String)> = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(0x1DE5_2024);

    for op in 1..=OPERATIONS {
        let roll = rng.random_range(0..100);
        if roll < 60 || model.is_empty() {
            let value = rng.random_range(0..500i64);
            let word = random_word(&mut rng);
            let id = table.add_row(&[Value::BigInt(value), Value::from(word.as_str())]).unwrap();
            model.insert(id, (value, word));
        } else {
            let pick = rng.random_range(0..model.len());
            let id = *model.keys().nth(pick).unwrap();
            if roll < 85 {
                assert!(table.delete_row(id).unwrap());
                model.remove(&id);
            } else {
                let value = rng.random_range(0..500i64);
                let word = random_word(&mut rng);
                // A row can only grow into its own page's free space.
                match table.update_row(id, &[Value::BigInt(value), Value::from(word.as_str())]) {
                    Ok(()) => {
                        model.insert(id, (value, word));
                    }
                    Err(TesseraError::PageFull) => {}
                    Err(e) => panic!("update failed: {}", e),
                }
            }
        }

        if op % CHECK_EVERY == 0 {
            check(&table, &model, &mut rng);
        }
    }

    assert_eq!(table.index_storage("ByValue").unwrap(), StorageKind::Paged);
}

#[test]
fn test_cursors_survive_bulk_delete() {
    let table = create_table();
    let mut rng = StdRng::seed_from_u64(42);
    let rows: Vec<Vec<Value>> = (0..1500)
        .map(|_| {
            vec![
                Value::BigInt(rng.random_range(0..300)),
                Value::from(random_word(&mut rng).as_str()),
            ]
        })
        .collect();
    table.add_rows(&rows).unwrap();

    let mut watcher = table.index_cursor("ByValue").unwrap();
    watcher.move_next_rows(700).unwrap();
    let parked = watcher.current_row_id().unwrap();

    let mut deleter = table.index_cursor("ByValue").unwrap();
    let mut deleted = 0u64;
    {
        let mut iter = deleter.iter();
        while let Some(row) = iter.next() {
            let row = row.unwrap();
            if matches!(row.get("value"), Some(Value::BigInt(v)) if v % 3 == 0) || row.id() == parked {
                iter.remove().unwrap();
                deleted += 1;
            }
        }
    }
    assert!(watcher.is_current_row_deleted());
    assert_eq!(table.row_count(), 1500 - deleted);

    let mut last = None;
    let mut remaining = 0;
    while watcher.move_to_next_row().unwrap() {
        let row = watcher.current_row().unwrap().unwrap();
        let value = match row.get("value") {
            Some(Value::BigInt(v)) => *v,
            other => panic!("unexpected value {:?}", other),
        };
        assert_ne!(value % 3, 0);
        if let Some(prev) = last {
            assert!(prev <= value);
        }
        last = Some(value);
        remaining += 1;
    }
    assert!(remaining < 800);
    table.validate_indexes().unwrap();
}
