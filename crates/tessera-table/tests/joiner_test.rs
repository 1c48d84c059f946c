//! Joining customers and their orders through foreign-key indexes.

use std::sync::Arc;

use tessera_common::{DataType, EngineConfig, TesseraError, Value};
use tessera_storage::{Column, IndexColumn, MemoryPageStore, PageStore, Row};
use tessera_table::{ForeignKeyRef, IndexDef, Joiner, Table, TableSchema};

fn long(name: &str) -> IndexColumn {
    IndexColumn::ascending(name, DataType::Long)
}

fn tables() -> (Table, Table) {
    let store: Arc<dyn PageStore> = Arc::new(MemoryPageStore::new());
    let config = EngineConfig::default();

    let customers = TableSchema::new(
        "customers",
        vec![Column::new("id", DataType::Long).required(), Column::new("name", DataType::Text)],
    )
    .with_index(
        IndexDef::new("PrimaryKey", vec![long("id")])
            .unique()
            .references(ForeignKeyRef::new("orders", "ByCustomer").primary_side()),
    );
    let orders = TableSchema::new(
        "orders",
        vec![
            Column::new("id", DataType::Long).required(),
            Column::new("customer", DataType::Long),
            Column::new("item", DataType::Text),
        ],
    )
    .with_index(IndexDef::new("PrimaryKey", vec![long("id")]).unique())
    .with_index(
        IndexDef::new("ByCustomer", vec![long("customer")])
            .references(ForeignKeyRef::new("customers", "PrimaryKey").cascade_delete()),
    );

    let customers = Table::create(store.clone(), customers, &config).unwrap();
    let orders = Table::create(store, orders, &config).unwrap();

    for (id, name) in [(1, "ada"), (2, "grace"), (3, "edsger")] {
        customers.add_row(&[Value::Long(id), Value::from(name)]).unwrap();
    }
    for (id, customer, item) in [
        (10, 2, "compiler"),
        (11, 1, "engine"),
        (12, 2, "cobol manual"),
        (13, 1, "notes"),
        (14, 2, "nanosecond"),
    ] {
        orders
            .add_row(&[Value::Long(id), Value::Long(customer), Value::from(item)])
            .unwrap();
    }
    (customers, orders)
}

fn customer(id: i32) -> Row {
    Row::from_pairs([("id", Value::Long(id))])
}

fn items(rows: impl Iterator<Item = tessera_common::Result<Row>>) -> Vec<String> {
    rows.map(|row| match row.unwrap().get("item") {
        Some(Value::Text(item)) => item.clone(),
        other => panic!("unexpected item {:?}", other),
    })
    .collect()
}

#[test]
fn test_order_finds_its_customer() {
    let (customers, orders) = tables();
    let joiner = Joiner::new(&orders, "ByCustomer", &customers).unwrap();
    assert_eq!(joiner.to_index().name, "PrimaryKey");
    assert!(!joiner.foreign_key().unwrap().primary_side);

    let order = Row::from_pairs([("id", Value::Long(11)), ("customer", Value::Long(1))]);
    let found = joiner.find_first_row(&order).unwrap().unwrap();
    assert_eq!(found.get("name"), Some(&Value::from("ada")));

    let orphan = Row::from_pairs([("customer", Value::Long(9))]);
    assert!(joiner.find_first_row(&orphan).unwrap().is_none());
    assert!(!joiner.has_rows(&orphan).unwrap());
}

#[test]
fn test_customer_finds_orders_in_key_order() {
    let (customers, orders) = tables();
    let joiner = Joiner::new(&customers, "PrimaryKey", &orders).unwrap();

    assert_eq!(
        items(joiner.find_rows(&customer(2)).unwrap()),
        vec!["compiler", "cobol manual", "nanosecond"]
    );
    assert_eq!(items(joiner.find_rows(&customer(1)).unwrap()), vec!["engine", "notes"]);
    assert!(joiner.has_rows(&customer(1)).unwrap());
    assert!(!joiner.has_rows(&customer(3)).unwrap());
}

#[test]
fn test_reverse_joiner() {
    let (customers, orders) = tables();
    let forward = Joiner::new(&orders, "ByCustomer", &customers).unwrap();
    let reverse = forward.create_reverse().unwrap();

    assert_eq!(reverse.from_table().name(), "customers");
    assert_eq!(reverse.to_index().name, "ByCustomer");
    assert!(reverse.foreign_key().unwrap().primary_side);
    assert_eq!(reverse.find_rows(&customer(2)).unwrap().count(), 3);
}

#[test]
fn test_delete_rows_removes_only_matches() {
    let (customers, orders) = tables();
    let joiner = Joiner::new(&customers, "PrimaryKey", &orders).unwrap();

    assert!(joiner.delete_rows(&customer(2)).unwrap());
    assert_eq!(orders.row_count(), 2);
    assert!(!joiner.has_rows(&customer(2)).unwrap());
    assert!(!joiner.delete_rows(&customer(2)).unwrap());
    assert!(!joiner.delete_rows(&customer(3)).unwrap());

    assert_eq!(items(joiner.find_rows(&customer(1)).unwrap()), vec!["engine", "notes"]);
    assert_eq!(customers.row_count(), 3);
    orders.validate_indexes().unwrap();
}

#[test]
fn test_invalid_joiners_rejected() {
    let (customers, orders) = tables();

    assert!(matches!(
        Joiner::new(&orders, "PrimaryKey", &customers),
        Err(TesseraError::InvalidArgument(_))
    ));
    assert!(matches!(
        Joiner::new(&orders, "ByCustomer", &orders),
        Err(TesseraError::InvalidArgument(_))
    ));
    assert!(matches!(
        Joiner::new(&orders, "ByNothing", &customers),
        Err(TesseraError::IndexNotFound(_))
    ));

    let joiner = Joiner::new(&customers, "PrimaryKey", &orders).unwrap();
    let nameless = Row::from_pairs([("name", Value::from("ada"))]);
    assert!(matches!(
        joiner.find_first_row(&nameless),
        Err(TesseraError::ColumnNotFound(_))
    ));
}

#[test]
fn test_column_count_mismatch_rejected() {
    let (customers, _) = tables();
    let schema = TableSchema::new(
        "ledger",
        vec![Column::new("customer", DataType::Long), Column::new("line", DataType::Long)],
    )
    .with_index(
        IndexDef::new("ByCustomerLine", vec![long("customer"), long("line")])
            .references(ForeignKeyRef::new("customers", "PrimaryKey")),
    );
    let ledger = Table::create(Arc::new(MemoryPageStore::new()), schema, &EngineConfig::default()).unwrap();

    assert!(matches!(
        Joiner::new(&ledger, "ByCustomerLine", &customers),
        Err(TesseraError::InvalidArgument(_))
    ));
}
