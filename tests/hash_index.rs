//! # Hash Index Integration Tests
//!
//! The unique hash index round-trip of the reference scenario: a string
//! key column paired with a vector payload, index lookups joined back to
//! the table, and the consistency of the entity after an index is dropped.

use cottontail::column::TxMode;
use cottontail::entity::Entity;
use cottontail::error::{DatabaseError, TransactionError, ValidationError};
use cottontail::index::IndexType;
use cottontail::records::{AtomicPredicate, Predicate};
use cottontail::types::{ColumnDef, ColumnType, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

const SHIFT: u32 = cottontail::config::constants::DEFAULT_DATA_PAGE_SHIFT;
const DIM: usize = 32;

fn keyed_entity(dir: &std::path::Path) -> Entity {
    Entity::create(
        dir,
        "features",
        vec![
            ColumnDef::new("id", ColumnType::String, 36, false),
            ColumnDef::new("vec", ColumnType::FloatVector, DIM, false),
        ],
        SHIFT,
        500,
    )
    .unwrap()
}

fn pseudo_uuid(rng: &mut StdRng) -> String {
    let a: u32 = rng.gen();
    let b: u16 = rng.gen();
    let c: u16 = rng.gen();
    let d: u16 = rng.gen();
    let e: u64 = rng.gen();
    format!("{a:08x}-{b:04x}-{c:04x}-{d:04x}-{:012x}", e & 0xFFFF_FFFF_FFFF)
}

fn random_vector(rng: &mut StdRng) -> Vec<f32> {
    (0..DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

#[test]
fn unique_index_round_trip_joins_back_to_the_table() {
    let dir = tempdir().unwrap();
    let entity = keyed_entity(dir.path());
    entity
        .create_index("id_idx", IndexType::UniqueHash, vec!["id".to_string()])
        .unwrap();

    let mut rng = StdRng::seed_from_u64(0xC077_0121);
    let n = 2_000;
    let mut keys = Vec::with_capacity(n);
    let mut vectors = Vec::with_capacity(n);

    let mut tx = entity.tx(TxMode::ReadWrite).unwrap();
    for _ in 0..n {
        let key = pseudo_uuid(&mut rng);
        let vector = random_vector(&mut rng);
        tx.insert(vec![
            Some(Value::String(key.clone())),
            Some(Value::FloatVector(vector.clone())),
        ])
        .unwrap();
        keys.push(key);
        vectors.push(vector);
    }
    tx.commit().unwrap();
    drop(tx);

    let tx = entity.tx(TxMode::ReadOnly).unwrap();
    let index = tx.index("id_idx").unwrap();

    // Every inserted key resolves to exactly one record whose tuple id
    // joins back to both the key and the vector.
    for probe in [0usize, 1, 77, 512, n - 1] {
        let hits = index
            .filter(&Predicate::atomic(AtomicPredicate::equal(
                "id",
                Value::String(keys[probe].clone()),
            )))
            .unwrap();
        assert_eq!(hits.len(), 1, "key {} must be unique", keys[probe]);

        let record = tx.read(hits.rows()[0].tuple_id).unwrap();
        assert_eq!(record.values()[0], Some(Value::String(keys[probe].clone())));
        assert_eq!(
            record.values()[1],
            Some(Value::FloatVector(vectors[probe].clone()))
        );
    }

    // A key that was never inserted finds nothing.
    let miss = index
        .filter(&Predicate::atomic(AtomicPredicate::equal(
            "id",
            Value::String("ffffffff-ffff-ffff-ffff-ffffffffffff".into()),
        )))
        .unwrap();
    assert!(miss.is_empty());
    drop(tx);
    entity.close().unwrap();
}

#[test]
fn unique_index_rejects_duplicate_key_before_commit() {
    let dir = tempdir().unwrap();
    let entity = keyed_entity(dir.path());
    entity
        .create_index("id_idx", IndexType::UniqueHash, vec!["id".to_string()])
        .unwrap();

    let mut tx = entity.tx(TxMode::ReadWrite).unwrap();
    tx.insert(vec![
        Some(Value::String("dup".into())),
        Some(Value::FloatVector(vec![0.0; DIM])),
    ])
    .unwrap();

    let result = tx.insert(vec![
        Some(Value::String("dup".into())),
        Some(Value::FloatVector(vec![1.0; DIM])),
    ]);
    assert!(matches!(
        result,
        Err(TransactionError::Validation(
            ValidationError::UniqueConstraint { .. }
        ))
    ));

    tx.rollback().unwrap();
    drop(tx);
    entity.close().unwrap();
}

#[test]
fn index_is_rebuilt_over_existing_rows_and_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let entity = keyed_entity(dir.path());
        let mut tx = entity.tx(TxMode::ReadWrite).unwrap();
        for i in 0..100 {
            tx.insert(vec![
                Some(Value::String(format!("key-{i:03}"))),
                Some(Value::FloatVector(vec![i as f32; DIM])),
            ])
            .unwrap();
        }
        tx.commit().unwrap();
        drop(tx);

        // The index arrives after the data and must pick it all up.
        entity
            .create_index("id_idx", IndexType::UniqueHash, vec!["id".to_string()])
            .unwrap();
        entity.close().unwrap();
    }

    let entity = Entity::open(dir.path(), "features", SHIFT, 500).unwrap();
    let tx = entity.tx(TxMode::ReadOnly).unwrap();
    let index = tx.index("id_idx").unwrap();
    let hits = index
        .filter(&Predicate::atomic(AtomicPredicate::equal(
            "id",
            Value::String("key-042".into()),
        )))
        .unwrap();
    assert_eq!(hits.len(), 1);
    let record = tx.read(hits.rows()[0].tuple_id).unwrap();
    assert_eq!(record.values()[1], Some(Value::FloatVector(vec![42.0; DIM])));
    drop(tx);
    entity.close().unwrap();
}

#[test]
fn dropping_an_index_leaves_the_entity_consistent() {
    let dir = tempdir().unwrap();
    let entity = keyed_entity(dir.path());
    entity
        .create_index("id_idx", IndexType::UniqueHash, vec!["id".to_string()])
        .unwrap();

    let index_file = entity
        .path()
        .join("idx_uq_hash_id_idx.db")
        .to_path_buf();
    assert!(index_file.exists());

    let mut tx = entity.tx(TxMode::ReadWrite).unwrap();
    let n = 1_000;
    for i in 0..n {
        tx.insert(vec![
            Some(Value::String(format!("key-{i:04}"))),
            Some(Value::FloatVector(vec![i as f32; DIM])),
        ])
        .unwrap();
    }
    tx.commit().unwrap();
    drop(tx);

    entity.drop_index("id_idx").unwrap();

    assert!(entity.all_indexes().is_empty());
    assert!(!index_file.exists(), "index file must be deleted");

    let tx = entity.tx(TxMode::ReadOnly).unwrap();
    assert_eq!(tx.count().unwrap(), n);
    let all = tx.read_all().unwrap();
    assert_eq!(all.len(), n as usize, "full scan still returns every row");
    assert!(matches!(
        tx.index("id_idx"),
        Err(DatabaseError::IndexNotFound(_))
    ));
    drop(tx);
    entity.close().unwrap();
}

#[test]
fn scan_task_prefers_the_index_and_matches_a_full_scan() {
    use cottontail::execution::{EntityScanTask, ExecutionTask};

    let dir = tempdir().unwrap();
    let entity = keyed_entity(dir.path());

    let mut tx = entity.tx(TxMode::ReadWrite).unwrap();
    for i in 0..200 {
        tx.insert(vec![
            Some(Value::String(format!("key-{i:03}"))),
            Some(Value::FloatVector(vec![i as f32; DIM])),
        ])
        .unwrap();
    }
    tx.commit().unwrap();
    drop(tx);

    let predicate = Predicate::atomic(AtomicPredicate::equal(
        "id",
        Value::String("key-123".into()),
    ));

    // Without an index the task falls back to a full scan.
    let scanned = EntityScanTask::new(&entity)
        .filter(predicate.clone())
        .execute()
        .unwrap();
    assert_eq!(scanned.len(), 1);

    entity
        .create_index("id_idx", IndexType::UniqueHash, vec!["id".to_string()])
        .unwrap();

    // With the index the same predicate goes through the O(1) probe.
    let indexed = EntityScanTask::new(&entity)
        .filter(predicate)
        .execute()
        .unwrap();
    assert_eq!(indexed.len(), 1);
    assert_eq!(indexed.rows()[0].tuple_id, scanned.rows()[0].tuple_id);
    assert_eq!(
        indexed.value(0, "id"),
        Some(&Value::String("key-123".into()))
    );
    assert_eq!(
        indexed.value(0, "vec"),
        Some(&Value::FloatVector(vec![123.0; DIM]))
    );
    entity.close().unwrap();
}

#[test]
fn duplicate_index_name_is_rejected() {
    let dir = tempdir().unwrap();
    let entity = keyed_entity(dir.path());
    entity
        .create_index("id_idx", IndexType::Hash, vec!["id".to_string()])
        .unwrap();
    assert!(matches!(
        entity.create_index("id_idx", IndexType::Hash, vec!["id".to_string()]),
        Err(DatabaseError::IndexAlreadyExists(_))
    ));
    entity.close().unwrap();
}

#[test]
fn vector_column_cannot_key_a_hash_index() {
    let dir = tempdir().unwrap();
    let entity = keyed_entity(dir.path());
    assert!(matches!(
        entity.create_index("vec_idx", IndexType::Hash, vec!["vec".to_string()]),
        Err(DatabaseError::Validation(_))
    ));
    entity.close().unwrap();
}
