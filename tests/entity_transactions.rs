//! # Entity Transaction Tests
//!
//! The multi-column transactional model: cross-column reads and writes,
//! the tuple-id invariant, nullability validation, predicate scans and the
//! reader/writer blocking guarantees of the entity tx lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cottontail::column::TxMode;
use cottontail::entity::Entity;
use cottontail::error::{TransactionError, ValidationError};
use cottontail::records::{AtomicPredicate, ComparisonOperator, Predicate};
use cottontail::types::{ColumnDef, ColumnType, Value};
use tempfile::tempdir;

const SHIFT: u32 = cottontail::config::constants::DEFAULT_DATA_PAGE_SHIFT;

fn people_entity(dir: &std::path::Path) -> Entity {
    Entity::create(
        dir,
        "people",
        vec![
            ColumnDef::scalar("id", ColumnType::Long, false),
            ColumnDef::new("name", ColumnType::String, 32, false),
            ColumnDef::scalar("age", ColumnType::Int, true),
        ],
        SHIFT,
        500,
    )
    .unwrap()
}

fn row(id: i64, name: &str, age: Option<i32>) -> Vec<Option<Value>> {
    vec![
        Some(Value::Long(id)),
        Some(Value::String(name.to_string())),
        age.map(Value::Int),
    ]
}

#[test]
fn insert_read_delete_across_columns() {
    let dir = tempdir().unwrap();
    let entity = people_entity(dir.path());

    let mut tx = entity.tx(TxMode::ReadWrite).unwrap();
    let t1 = tx.insert(row(1, "ada", Some(36))).unwrap();
    let t2 = tx.insert(row(2, "grace", None)).unwrap();
    assert_eq!(tx.count().unwrap(), 2);

    let record = tx.read(t1).unwrap();
    assert_eq!(record.values()[0], Some(Value::Long(1)));
    assert_eq!(record.values()[1], Some(Value::String("ada".into())));
    assert_eq!(record.values()[2], Some(Value::Int(36)));

    let record = tx.read(t2).unwrap();
    assert_eq!(record.values()[2], None, "nullable column holds null");

    tx.delete(t1).unwrap();
    assert_eq!(tx.count().unwrap(), 1);

    let all = tx.read_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all.rows()[0].tuple_id, t2);

    tx.commit().unwrap();
    drop(tx);
    entity.close().unwrap();
}

#[test]
fn every_tuple_id_is_present_in_every_column_after_commit() {
    let dir = tempdir().unwrap();
    let entity = people_entity(dir.path());

    let mut tx = entity.tx(TxMode::ReadWrite).unwrap();
    let tids = tx
        .insert_all((0..100).map(|i| row(i, "p", Some(i as i32))).collect())
        .unwrap();
    tx.commit().unwrap();
    drop(tx);

    let tx = entity.tx(TxMode::ReadOnly).unwrap();
    for tid in tids {
        let record = tx.read(tid).unwrap();
        assert!(record.values()[0].is_some());
        assert!(record.values()[1].is_some());
        assert!(record.values()[2].is_some());
    }
    drop(tx);
    entity.close().unwrap();
}

#[test]
fn null_in_non_nullable_column_is_rejected_before_any_mutation() {
    let dir = tempdir().unwrap();
    let entity = people_entity(dir.path());

    let mut tx = entity.tx(TxMode::ReadWrite).unwrap();
    let result = tx.insert(vec![
        None,
        Some(Value::String("x".into())),
        Some(Value::Int(1)),
    ]);
    assert!(matches!(
        result,
        Err(TransactionError::Validation(
            ValidationError::NullNotAllowed { .. }
        ))
    ));
    assert_eq!(tx.count().unwrap(), 0, "nothing was written");

    let result = tx.insert(vec![Some(Value::Long(1)), Some(Value::Int(2)), None]);
    assert!(
        matches!(result, Err(TransactionError::Validation(_))),
        "type mismatch is also caught up front"
    );
    assert_eq!(tx.count().unwrap(), 0);
    drop(tx);
    entity.close().unwrap();
}

#[test]
fn rollback_restores_all_columns_and_the_row_count() {
    let dir = tempdir().unwrap();
    let entity = people_entity(dir.path());

    let mut tx = entity.tx(TxMode::ReadWrite).unwrap();
    tx.insert(row(1, "kept", Some(1))).unwrap();
    tx.commit().unwrap();

    tx.insert(row(2, "discarded", Some(2))).unwrap();
    tx.rollback().unwrap();
    drop(tx);

    let tx = entity.tx(TxMode::ReadOnly).unwrap();
    assert_eq!(tx.count().unwrap(), 1);
    assert_eq!(tx.max_tuple_id().unwrap(), 2);
    drop(tx);
    entity.close().unwrap();
}

#[test]
fn atomic_predicate_scan_returns_matching_rows() {
    let dir = tempdir().unwrap();
    let entity = people_entity(dir.path());

    let mut tx = entity.tx(TxMode::ReadWrite).unwrap();
    for i in 0..50 {
        tx.insert(row(i, if i % 2 == 0 { "even" } else { "odd" }, Some(i as i32)))
            .unwrap();
    }
    tx.commit().unwrap();
    drop(tx);

    let tx = entity.tx(TxMode::ReadOnly).unwrap();
    let evens = tx
        .filter(&Predicate::atomic(AtomicPredicate::equal(
            "name",
            Value::String("even".into()),
        )))
        .unwrap();
    assert_eq!(evens.len(), 25);

    let young = tx
        .filter(&Predicate::atomic(AtomicPredicate::new(
            "age",
            ComparisonOperator::Less,
            vec![Value::Int(10)],
        )))
        .unwrap();
    assert_eq!(young.len(), 10);

    // Compound predicate takes the materialising path.
    let both = tx
        .filter(
            &Predicate::atomic(AtomicPredicate::equal("name", Value::String("even".into())))
                .and(Predicate::atomic(AtomicPredicate::new(
                    "age",
                    ComparisonOperator::Less,
                    vec![Value::Int(10)],
                ))),
        )
        .unwrap();
    assert_eq!(both.len(), 5);
    drop(tx);
    entity.close().unwrap();
}

#[test]
fn second_writer_blocks_until_first_finishes() {
    let dir = tempdir().unwrap();
    let entity = Arc::new(people_entity(dir.path()));

    let mut writer = entity.tx(TxMode::ReadWrite).unwrap();
    writer.insert(row(1, "first", None)).unwrap();

    let second_started = Arc::new(AtomicBool::new(false));
    let second_done = Arc::new(AtomicBool::new(false));

    let handle = {
        let entity = Arc::clone(&entity);
        let started = Arc::clone(&second_started);
        let done = Arc::clone(&second_done);
        std::thread::spawn(move || {
            started.store(true, Ordering::SeqCst);
            let mut tx = entity.tx(TxMode::ReadWrite).unwrap();
            tx.insert(row(2, "second", None)).unwrap();
            tx.commit().unwrap();
            done.store(true, Ordering::SeqCst);
        })
    };

    while !second_started.load(Ordering::SeqCst) {
        std::thread::yield_now();
    }
    std::thread::sleep(Duration::from_millis(150));
    assert!(
        !second_done.load(Ordering::SeqCst),
        "second writer must wait for the first"
    );

    writer.commit().unwrap();
    drop(writer);
    handle.join().unwrap();
    assert!(second_done.load(Ordering::SeqCst));

    let tx = entity.tx(TxMode::ReadOnly).unwrap();
    assert_eq!(tx.count().unwrap(), 2);
    drop(tx);
    entity.close().unwrap();
}

#[test]
fn concurrent_readers_do_not_block_each_other() {
    let dir = tempdir().unwrap();
    let entity = Arc::new(people_entity(dir.path()));

    let mut tx = entity.tx(TxMode::ReadWrite).unwrap();
    tx.insert(row(1, "r", None)).unwrap();
    tx.commit().unwrap();
    drop(tx);

    let first = entity.tx(TxMode::ReadOnly).unwrap();
    // A second read-only transaction opens while the first is live.
    let second = entity.tx(TxMode::ReadOnly).unwrap();
    assert_eq!(first.count().unwrap(), 1);
    assert_eq!(second.count().unwrap(), 1);
    drop(first);
    drop(second);
    entity.close().unwrap();
}

#[test]
fn projection_transactions_read_selected_columns_only() {
    let dir = tempdir().unwrap();
    let entity = people_entity(dir.path());

    let mut tx = entity.tx(TxMode::ReadWrite).unwrap();
    let tid = tx.insert(row(7, "proj", Some(21))).unwrap();
    tx.commit().unwrap();
    drop(tx);

    let tx = entity.tx_on(TxMode::ReadOnly, &["age", "id"]).unwrap();
    let schema = tx.schema();
    assert_eq!(schema[0].name, "age");
    assert_eq!(schema[1].name, "id");

    let record = tx.read(tid).unwrap();
    assert_eq!(record.values()[0], Some(Value::Int(21)));
    assert_eq!(record.values()[1], Some(Value::Long(7)));
    assert_eq!(record.len(), 2);
    drop(tx);
    entity.close().unwrap();
}

#[test]
fn entity_survives_close_and_reopen_with_header_intact() {
    let dir = tempdir().unwrap();
    {
        let entity = people_entity(dir.path());
        let mut tx = entity.tx(TxMode::ReadWrite).unwrap();
        tx.insert_all((0..10).map(|i| row(i, "p", None)).collect())
            .unwrap();
        tx.commit().unwrap();
        drop(tx);
        entity.close().unwrap();
    }

    let entity = Entity::open(dir.path(), "people", SHIFT, 500).unwrap();
    let defs = entity.column_defs();
    assert_eq!(defs.len(), 3);
    assert_eq!(defs[1].name, "name");

    let tx = entity.tx(TxMode::ReadOnly).unwrap();
    assert_eq!(tx.count().unwrap(), 10);
    drop(tx);
    entity.close().unwrap();
}
