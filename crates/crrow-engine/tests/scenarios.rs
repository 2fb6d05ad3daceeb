//! End-to-end replication scenarios between in-memory replicas.

use crrow_core::{ChangeRecord, ColumnId, PackedKey, SiteId, Value};
use crrow_engine::{DiscardReason, EngineConfigBuilder, EngineError, MergeOutcome, Replica};
use crrow_store::{ClockStore, MemoryStore, Row, RowStore, TableBuilder};

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn foo_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    store
        .create_table(TableBuilder::new("foo").pk("a", "INTEGER").column("b", "TEXT").build())
        .unwrap();
    store
}

fn foo_replica() -> Replica<MemoryStore> {
    let mut replica = Replica::open(foo_store()).unwrap();
    replica.track_table("foo").unwrap();
    replica
}

fn changes(replica: &mut Replica<MemoryStore>, since: i64, exclude: Option<SiteId>) -> Vec<ChangeRecord> {
    replica
        .changes_since(since, exclude)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

/// Pull everything `from` has that `to` did not write.
fn pull(from: &mut Replica<MemoryStore>, to: &mut Replica<MemoryStore>) {
    let batch = changes(from, 0, Some(to.site_id()));
    let report = to.merge_batch(&batch).unwrap();
    assert!(report.is_clean(), "merge failures: {:?}", report.failed);
}

fn b_of(replica: &Replica<MemoryStore>, a: i64) -> Option<Value> {
    replica
        .read_row("foo", &[Value::Integer(a)])
        .unwrap()
        .map(|r| r["b"].clone())
}

// ============================================================================
// Extraction
// ============================================================================

#[test]
fn test_insert_extracts_one_record_per_column() {
    let mut a = foo_replica();
    let b = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
        .unwrap();

    let records = changes(&mut a, 0, Some(b.site_id()));
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.table, "foo");
    assert_eq!(record.column, ColumnId::column("b"));
    assert_eq!(record.value, Some(Value::text("x")));
    assert_eq!(record.pk.unpack().unwrap(), vec![Value::Integer(1)]);
    assert_eq!(record.site_id, a.site_id());
    assert_eq!((record.column_version, record.db_version), (1, 1));
}

#[test]
fn test_extraction_since_current_version_is_empty() {
    let mut a = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
        .unwrap();

    let current = a.db_version().unwrap();
    assert!(changes(&mut a, current, None).is_empty());
    assert_eq!(changes(&mut a, current - 1, None).len(), 1);
}

#[test]
fn test_extraction_excludes_the_requesting_site() {
    let mut a = foo_replica();
    let mut b = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
        .unwrap();
    pull(&mut a, &mut b);

    assert!(changes(&mut b, 0, Some(a.site_id())).is_empty());
    let relayed = changes(&mut b, 0, None);
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].site_id, a.site_id());
}

#[test]
fn test_extraction_is_ordered_and_restartable() {
    let mut a = foo_replica();
    a.begin().unwrap();
    a.insert("foo", row(&[("a", Value::Integer(2)), ("b", Value::text("p"))]))
        .unwrap();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("q"))]))
        .unwrap();
    a.commit().unwrap();
    a.update("foo", &[Value::Integer(2)], row(&[("b", Value::text("r"))]))
        .unwrap();

    let first = changes(&mut a, 0, None);
    let order: Vec<_> = first
        .iter()
        .map(|r| (r.db_version, r.pk.unpack().unwrap()[0].clone()))
        .collect();
    assert_eq!(
        order,
        vec![(1, Value::Integer(1)), (2, Value::Integer(2))]
    );
    assert_eq!(changes(&mut a, 0, None), first);
}

#[test]
fn test_batched_extraction_keeps_versions_together() {
    let store = foo_store();
    let config = EngineConfigBuilder::new().max_batch_size(2).build();
    let mut a = Replica::with_config(store, config).unwrap();
    a.track_table("foo").unwrap();

    a.begin().unwrap();
    for i in 0..3 {
        a.insert("foo", row(&[("a", Value::Integer(i)), ("b", Value::text("x"))]))
            .unwrap();
    }
    a.commit().unwrap();
    a.insert("foo", row(&[("a", Value::Integer(9)), ("b", Value::text("y"))]))
        .unwrap();

    let batches = a.changes_since_batched(0, None).unwrap();
    let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![3, 1]);
}

// ============================================================================
// Conflicts
// ============================================================================

#[test]
fn test_concurrent_updates_converge_to_greater_value() {
    let mut a = foo_replica();
    let mut b = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
        .unwrap();
    pull(&mut a, &mut b);

    a.update("foo", &[Value::Integer(1)], row(&[("b", Value::text("y"))]))
        .unwrap();
    b.update("foo", &[Value::Integer(1)], row(&[("b", Value::text("z"))]))
        .unwrap();

    pull(&mut a, &mut b);
    pull(&mut b, &mut a);

    assert_eq!(b_of(&a, 1), Some(Value::text("z")));
    assert_eq!(b_of(&b, 1), Some(Value::text("z")));
}

#[test]
fn test_integer_and_real_of_same_number_converge() {
    let mut a = foo_replica();
    let mut b = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::Integer(1))]))
        .unwrap();
    b.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::Real(1.0))]))
        .unwrap();

    pull(&mut a, &mut b);
    pull(&mut b, &mut a);

    for replica in [&a, &b] {
        assert!(matches!(b_of(replica, 1), Some(Value::Real(r)) if r == 1.0));
    }
}

#[test]
fn test_integer_to_real_update_is_replicated() {
    let mut a = foo_replica();
    let mut b = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::Integer(1))]))
        .unwrap();
    pull(&mut a, &mut b);

    let before = a.db_version().unwrap();
    a.update("foo", &[Value::Integer(1)], row(&[("b", Value::Real(1.0))]))
        .unwrap();
    let records = changes(&mut a, before, None);
    assert_eq!(records.len(), 1);
    assert!(matches!(records[0].value, Some(Value::Real(_))));

    pull(&mut a, &mut b);
    assert!(matches!(b_of(&b, 1), Some(Value::Real(r)) if r == 1.0));
}

#[test]
fn test_local_delete_wins_over_remote_update() {
    let mut a = foo_replica();
    let mut b = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
        .unwrap();
    pull(&mut a, &mut b);

    assert!(b.delete("foo", &[Value::Integer(1)]).unwrap());
    for i in 0..5 {
        a.update("foo", &[Value::Integer(1)], row(&[("b", Value::text(format!("v{}", i)))]))
            .unwrap();
    }
    let late = changes(&mut a, 0, Some(b.site_id()));
    assert!(late.iter().all(|r| r.column_version > 1));

    for record in &late {
        assert_eq!(
            b.merge(record).unwrap(),
            MergeOutcome::Discarded(DiscardReason::RowDeleted)
        );
    }
    assert_eq!(b_of(&b, 1), None);

    pull(&mut b, &mut a);
    assert_eq!(b_of(&a, 1), None);
}

#[test]
fn test_same_record_twice_is_a_no_op() {
    let mut b = foo_replica();
    let record = ChangeRecord::column(
        "foo",
        PackedKey::pack(&[Value::Integer(1)]).unwrap(),
        "b",
        Value::text("y"),
        5,
        5,
        SiteId::from_bytes([7; 16]),
    );

    assert_eq!(b.merge(&record).unwrap(), MergeOutcome::Applied);
    let entries = b.clock_entries("foo").unwrap();
    assert_eq!(
        b.merge(&record).unwrap(),
        MergeOutcome::Discarded(DiscardReason::Converged)
    );
    assert_eq!(b.clock_entries("foo").unwrap(), entries);
    assert_eq!(b_of(&b, 1), Some(Value::text("y")));
}

// ============================================================================
// Keys
// ============================================================================

#[test]
fn test_composite_keys_with_separator_characters() {
    fn tags() -> Replica<MemoryStore> {
        let mut store = MemoryStore::new();
        store
            .create_table(
                TableBuilder::new("tags")
                    .pk("x", "TEXT")
                    .pk("y", "TEXT")
                    .column("n", "INTEGER")
                    .build(),
            )
            .unwrap();
        let mut replica = Replica::open(store).unwrap();
        replica.track_table("tags").unwrap();
        replica
    }

    let mut a = tags();
    let mut b = tags();
    let keys = [("a|b", "'c'"), ("a", "|b'c'"), ("a|b'", "c'"), ("", "a|b|'c'")];
    for (i, (x, y)) in keys.iter().enumerate() {
        a.insert(
            "tags",
            row(&[
                ("x", Value::text(*x)),
                ("y", Value::text(*y)),
                ("n", Value::Integer(i as i64)),
            ]),
        )
        .unwrap();
    }

    pull(&mut a, &mut b);
    assert_eq!(b.store().row_count("tags").unwrap(), keys.len());
    for (i, (x, y)) in keys.iter().enumerate() {
        let merged = b
            .read_row("tags", &[Value::text(*x), Value::text(*y)])
            .unwrap()
            .unwrap();
        assert_eq!(merged["n"], Value::Integer(i as i64));
    }
}

#[test]
fn test_key_rewrite_replicates_as_delete_and_create() {
    let mut a = foo_replica();
    let mut b = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
        .unwrap();
    pull(&mut a, &mut b);

    a.update("foo", &[Value::Integer(1)], row(&[("a", Value::Integer(2))]))
        .unwrap();
    pull(&mut a, &mut b);

    assert_eq!(b_of(&b, 1), None);
    assert_eq!(b_of(&b, 2), Some(Value::text("x")));
}

#[test]
fn test_pk_only_tables_replicate_inserts_and_deletes() {
    fn members() -> Replica<MemoryStore> {
        let mut store = MemoryStore::new();
        store
            .create_table(TableBuilder::new("members").pk("team", "INTEGER").pk("user", "INTEGER").build())
            .unwrap();
        let mut replica = Replica::open(store).unwrap();
        replica.track_table("members").unwrap();
        replica
    }

    let mut a = members();
    let mut b = members();
    a.insert("members", row(&[("team", Value::Integer(1)), ("user", Value::Integer(2))]))
        .unwrap();
    a.insert("members", row(&[("team", Value::Integer(1)), ("user", Value::Integer(3))]))
        .unwrap();

    let records = changes(&mut a, 0, None);
    assert!(records.iter().all(|r| r.column == ColumnId::PkOnly && r.value.is_none()));
    pull(&mut a, &mut b);
    assert_eq!(b.store().row_count("members").unwrap(), 2);

    a.delete("members", &[Value::Integer(1), Value::Integer(2)]).unwrap();
    pull(&mut a, &mut b);
    assert_eq!(b.store().row_count("members").unwrap(), 1);
}

#[test]
fn test_deleted_keys_cannot_be_reused() {
    let mut a = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
        .unwrap();
    a.delete("foo", &[Value::Integer(1)]).unwrap();

    let result = a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("y"))]));
    assert!(matches!(result, Err(EngineError::Unsupported { .. })));
    assert_eq!(b_of(&a, 1), None);
}

// ============================================================================
// Versions and transactions
// ============================================================================

#[test]
fn test_transaction_writes_share_one_version() {
    let mut a = foo_replica();
    a.begin().unwrap();
    for i in 0..4 {
        a.insert("foo", row(&[("a", Value::Integer(i)), ("b", Value::text("x"))]))
            .unwrap();
    }
    a.update("foo", &[Value::Integer(0)], row(&[("b", Value::text("y"))]))
        .unwrap();
    a.commit().unwrap();

    let entries = a.clock_entries("foo").unwrap();
    assert_eq!(entries.len(), 4);
    assert!(entries.iter().all(|e| e.db_version == 1 && e.column_version == 1));
    let mut seqs: Vec<_> = entries.iter().map(|e| e.seq).collect();
    seqs.sort();
    seqs.dedup();
    assert_eq!(seqs.len(), 4);
}

#[test]
fn test_versions_increase_by_one_per_commit() {
    let mut a = foo_replica();
    let mut versions = Vec::new();
    for i in 0..5 {
        a.insert("foo", row(&[("a", Value::Integer(i)), ("b", Value::text("x"))]))
            .unwrap();
        versions.push(a.db_version().unwrap());
    }
    assert_eq!(versions, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_rollback_discards_stamps_and_reuses_version() {
    let mut a = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
        .unwrap();

    a.begin().unwrap();
    a.update("foo", &[Value::Integer(1)], row(&[("b", Value::text("y"))]))
        .unwrap();
    a.rollback().unwrap();

    assert_eq!(b_of(&a, 1), Some(Value::text("x")));
    assert_eq!(a.db_version().unwrap(), 1);

    a.update("foo", &[Value::Integer(1)], row(&[("b", Value::text("z"))]))
        .unwrap();
    assert_eq!(a.db_version().unwrap(), 2);
}

#[test]
fn test_no_op_update_writes_no_clock_entry() {
    let mut a = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
        .unwrap();
    let before = a.clock_entries("foo").unwrap();

    assert!(a
        .update("foo", &[Value::Integer(1)], row(&[("b", Value::text("x"))]))
        .unwrap());
    assert_eq!(a.clock_entries("foo").unwrap(), before);
    assert_eq!(a.db_version().unwrap(), 1);
}

#[test]
fn test_track_table_backfills_existing_rows_once() {
    let mut store = foo_store();
    for i in 0..3 {
        store
            .insert_row("foo", &row(&[("a", Value::Integer(i)), ("b", Value::text("x"))]))
            .unwrap();
    }

    let mut a = Replica::open(store).unwrap();
    a.track_table("foo").unwrap();
    let entries = a.clock_entries("foo").unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.db_version == 1));

    a.track_table("foo").unwrap();
    assert_eq!(a.clock_entries("foo").unwrap(), entries);
}

#[test]
fn test_tables_without_primary_key_are_rejected() {
    let mut store = MemoryStore::new();
    store
        .create_table(TableBuilder::new("log").column("line", "TEXT").build())
        .unwrap();
    let mut a = Replica::open(store).unwrap();

    assert!(matches!(
        a.track_table("log"),
        Err(EngineError::Unsupported { .. })
    ));
    assert!(!a.is_tracked("log"));
    assert!(matches!(
        a.track_table("missing"),
        Err(EngineError::NotFound { .. })
    ));
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_batch_reports_failures_and_continues() {
    let mut a = foo_replica();
    let mut b = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
        .unwrap();
    let mut batch = changes(&mut a, 0, None);

    let mut unknown = batch[0].clone();
    unknown.table = "nope".into();
    let mut drift = batch[0].clone();
    drift.column = ColumnId::column("gone");
    batch.insert(0, unknown);
    batch.insert(1, drift);

    let report = b.merge_batch(&batch).unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed.len(), 2);
    assert!(matches!(report.failed[0], (0, EngineError::NotFound { .. })));
    assert!(matches!(report.failed[1], (1, EngineError::SchemaDrift { .. })));
    assert_eq!(b_of(&b, 1), Some(Value::text("x")));
}

#[test]
fn test_failed_record_leaves_no_partial_write() {
    let mut a = foo_replica();
    let mut b = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
        .unwrap();
    let batch = changes(&mut a, 0, None);

    b.store_mut().fail_clock_writes("foo");
    let result = b.merge(&batch[0]);
    assert!(matches!(result, Err(EngineError::Store(_))));
    assert_eq!(b_of(&b, 1), None);

    b.store_mut().clear_faults();
    assert_eq!(b.merge(&batch[0]).unwrap(), MergeOutcome::Applied);
    assert_eq!(b_of(&b, 1), Some(Value::text("x")));
}

#[test]
fn test_extraction_reports_schema_drift() {
    let mut a = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
        .unwrap();
    a.store_mut().drop_column("foo", "b").unwrap();

    let result: Result<Vec<_>, _> = a.changes_since(0, None).unwrap().collect();
    assert!(matches!(result, Err(EngineError::SchemaDrift { .. })));
}

#[test]
fn test_compaction_after_drop_column_restores_extraction() {
    let mut a = foo_replica();
    let mut b = foo_replica();
    a.store_mut().add_column("foo", "c", "TEXT").unwrap();
    a.insert(
        "foo",
        row(&[("a", Value::Integer(1)), ("b", Value::text("x")), ("c", Value::text("old"))]),
    )
    .unwrap();
    a.store_mut().drop_column("foo", "c").unwrap();
    a.insert("foo", row(&[("a", Value::Integer(2)), ("b", Value::text("y"))]))
        .unwrap();

    let report = a.compact_after_alter("foo").unwrap();
    assert_eq!(report.stale_columns, 1);
    assert_eq!(report.backfilled, 0);

    let records = changes(&mut a, 0, None);
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.column == ColumnId::column("b")));

    pull(&mut a, &mut b);
    assert_eq!(b_of(&b, 1), Some(Value::text("x")));
    assert_eq!(b_of(&b, 2), Some(Value::text("y")));
    assert!(a.compact_after_alter("foo").unwrap().is_noop());
}

#[test]
fn test_alter_table_backfills_added_column() {
    let mut a = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
        .unwrap();
    let before = a.db_version().unwrap();

    let report = a
        .alter_table("foo", |store| store.add_column("foo", "c", "TEXT"))
        .unwrap();
    assert_eq!(report.backfilled, 1);

    let records = changes(&mut a, before, None);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].column, ColumnId::column("c"));
    assert_eq!(records[0].value, Some(Value::Null));
}

#[test]
fn test_failed_alter_table_changes_nothing() {
    let mut a = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
        .unwrap();
    let entries = a.clock_entries("foo").unwrap();

    let result = a.alter_table("foo", |store| {
        store.add_column("foo", "c", "TEXT")?;
        store.drop_column("foo", "a")
    });
    assert!(result.is_err());
    assert!(a.read_row("foo", &[Value::Integer(1)]).unwrap().unwrap().get("c").is_none());
    assert_eq!(a.clock_entries("foo").unwrap(), entries);
    assert!(matches!(
        a.alter_table("missing", |_| Ok(())),
        Err(EngineError::NotFound { .. })
    ));
}

#[test]
fn test_added_column_is_picked_up() {
    let mut a = foo_replica();
    let mut b = foo_replica();
    for replica in [&mut a, &mut b] {
        replica.store_mut().add_column("foo", "c", "TEXT").unwrap();
    }

    a.insert(
        "foo",
        row(&[("a", Value::Integer(1)), ("b", Value::text("x")), ("c", Value::text("new"))]),
    )
    .unwrap();
    assert_eq!(changes(&mut a, 0, None).len(), 2);

    pull(&mut a, &mut b);
    let merged = b.read_row("foo", &[Value::Integer(1)]).unwrap().unwrap();
    assert_eq!(merged["c"], Value::text("new"));
}

// ============================================================================
// Peers and transport
// ============================================================================

#[test]
fn test_peer_versions_are_recorded_on_commit_only() {
    let mut a = foo_replica();
    let mut b = foo_replica();
    for i in 0..3 {
        a.insert("foo", row(&[("a", Value::Integer(i)), ("b", Value::text("x"))]))
            .unwrap();
    }
    let batch = changes(&mut a, 0, None);

    b.begin().unwrap();
    b.merge_batch(&batch).unwrap();
    b.rollback().unwrap();
    assert_eq!(b.peer_version(&a.site_id()).unwrap(), None);

    b.merge_batch(&batch).unwrap();
    assert_eq!(b.peer_version(&a.site_id()).unwrap(), Some(3));

    let mark = b.peer_version(&a.site_id()).unwrap().unwrap();
    let resumed = changes(&mut a, mark, None);
    assert!(resumed.is_empty());
}

#[test]
fn test_batches_survive_json_transport() {
    let mut a = foo_replica();
    let mut b = foo_replica();
    a.insert("foo", row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
        .unwrap();
    a.insert("foo", row(&[("a", Value::Integer(2)), ("b", Value::Null)]))
        .unwrap();
    a.delete("foo", &[Value::Integer(1)]).unwrap();

    let wire = serde_json::to_string(&changes(&mut a, 0, None)).unwrap();
    let received: Vec<ChangeRecord> = serde_json::from_str(&wire).unwrap();
    let report = b.merge_batch(&received).unwrap();

    assert_eq!(report.applied, 2);
    assert_eq!(b_of(&b, 1), None);
    assert_eq!(b_of(&b, 2), Some(Value::Null));
    assert!(b
        .store()
        .get_clock("foo", &PackedKey::pack(&[Value::Integer(1)]).unwrap(), &ColumnId::Delete)
        .unwrap()
        .is_some());
}
